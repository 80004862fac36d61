//! Load engine error types

use thiserror::Error;

/// Result type alias for warehouse operations
pub type LoadResult<T> = std::result::Result<T, LoadError>;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Connection dropped mid-operation; always safe to retry the atomic unit
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<LoadError>,
    },

    /// An insert hit a conflict but the conflicting row is not yet visible
    #[error("Natural key {0} conflicted but no existing row is visible")]
    UnresolvedConflict(String),

    #[error("Checkpoint write failed: {0}")]
    CheckpointWrite(String),

    #[error("Load cancelled")]
    Cancelled,

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run '{run_id}' cannot be {action}: status is {status}")]
    RunState {
        run_id: String,
        action: &'static str,
        status: String,
    },

    #[error("Study '{study_id}' could not be read: {message}")]
    Source { study_id: String, message: String },

    #[error("Correlation for study '{study_id}' failed: {message}")]
    Correlation { study_id: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] gxw_common::GxwError),
}

impl LoadError {
    /// Whether retrying the same atomic unit may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::ConnectionLost(_) | LoadError::UnresolvedConflict(_) => true,
            LoadError::Database(err) => is_transient_sqlx(err),
            _ => false,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_code(&code)),
        _ => false,
    }
}

/// Postgres SQLSTATEs and SQLite extended result codes worth retrying
fn is_transient_code(code: &str) -> bool {
    // Postgres class 08: connection exception
    if code.starts_with("08") {
        return true;
    }
    matches!(
        code,
        // serialization_failure, deadlock_detected
        "40001" | "40P01"
        // admin_shutdown, crash_shutdown, cannot_connect_now, too_many_connections
        | "57P01" | "57P02" | "57P03" | "53300"
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
        | "5" | "6" | "261" | "262" | "517" | "773"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LoadError::ConnectionLost("reset".into()).is_transient());
        assert!(LoadError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(LoadError::Database(sqlx::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset
        )))
        .is_transient());

        assert!(!LoadError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!LoadError::CheckpointWrite("disk full".into()).is_transient());
        assert!(!LoadError::Cancelled.is_transient());
    }

    #[test]
    fn test_exhausted_retries_are_not_transient() {
        let err = LoadError::RetriesExhausted {
            operation: "commit batch".into(),
            attempts: 3,
            source: Box::new(LoadError::ConnectionLost("reset".into())),
        };
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "commit batch failed after 3 attempts: Connection lost: reset");
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient_code("08006"));
        assert!(is_transient_code("40P01"));
        assert!(is_transient_code("5"));
        assert!(!is_transient_code("23505"));
        assert!(!is_transient_code("2067"));
    }
}
