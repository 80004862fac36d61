//! Shared helpers for unit tests

#![allow(clippy::unwrap_used)]

use sqlx::AnyPool;
use tempfile::TempDir;

use crate::db::{create_pool, schema::ensure_schema, Backend, DbConfig};

/// Fresh SQLite warehouse with the schema applied, stored in `dir`
pub async fn sqlite_pool(dir: &TempDir) -> AnyPool {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("warehouse.db").display());
    let pool = create_pool(&DbConfig::new(url)).await.unwrap();
    ensure_schema(&pool, Backend::Sqlite).await.unwrap();
    pool
}
