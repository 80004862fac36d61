//! Checksum utilities for run fingerprints

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint of an effective configuration.
///
/// Hashes the canonical JSON form, so two configurations hash equal exactly
/// when they serialize equal. Stored on every run and compared on resume.
pub fn config_hash<T: Serialize>(config: &T) -> Result<String> {
    let canonical = serde_json::to_vec(config)?;
    Ok(sha256_hex(&canonical))
}
