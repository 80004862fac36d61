//! Database pool and backend selection

pub mod schema;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;

use crate::error::{LoadError, LoadResult};

/// Storage backend, derived from the connection URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> LoadResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "sqlite" => Ok(Backend::Sqlite),
            _ => Err(LoadError::config(format!(
                "unsupported database URL scheme '{scheme}'; expected postgres:// or sqlite://"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://gxw.db?mode=rwc".to_string(),
            max_connections: 5,
            connect_timeout_secs: 30,
            idle_timeout_secs: Some(600),
        }
    }
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_env() -> LoadResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| LoadError::config("DATABASE_URL not set"))?;

        let max_connections = std::env::var("GXW_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let connect_timeout_secs = std::env::var("GXW_DB_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            url,
            max_connections,
            connect_timeout_secs,
            idle_timeout_secs: Some(600),
        })
    }

    pub fn backend(&self) -> LoadResult<Backend> {
        Backend::from_url(&self.url)
    }
}

/// Open a pool for either backend.
///
/// SQLite allows one writer at a time, so its pool is capped at a single
/// connection: concurrent studies queue on it instead of failing with
/// `SQLITE_BUSY`.
pub async fn create_pool(config: &DbConfig) -> LoadResult<AnyPool> {
    sqlx::any::install_default_drivers();
    let backend = config.backend()?;

    let max_connections = match backend {
        Backend::Sqlite => 1,
        Backend::Postgres => config.max_connections.max(1),
    };

    let mut options = AnyPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        backend = backend.as_str(),
        max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &AnyPool) -> LoadResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(LoadError::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(Backend::from_url("postgresql://localhost/gxw").unwrap(), Backend::Postgres);
        assert_eq!(Backend::from_url("postgres://u:p@h/db").unwrap(), Backend::Postgres);
        assert_eq!(Backend::from_url("sqlite://./gxw.db?mode=rwc").unwrap(), Backend::Sqlite);
        assert!(Backend::from_url("mssql://server/db").is_err());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("DATABASE_URL", "postgresql://localhost/test");
        std::env::set_var("GXW_DB_MAX_CONNECTIONS", "15");

        let config = DbConfig::from_env().unwrap();
        assert_eq!(config.max_connections, 15);
        assert_eq!(config.backend().unwrap(), Backend::Postgres);

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("GXW_DB_MAX_CONNECTIONS");
    }

    #[test]
    #[serial]
    fn test_config_from_env_missing_url() {
        std::env::remove_var("DATABASE_URL");
        assert!(DbConfig::from_env().is_err());
    }

    #[tokio::test]
    async fn test_sqlite_pool_health_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("health.db").display());
        let pool = create_pool(&DbConfig::new(url)).await.unwrap();
        health_check(&pool).await.unwrap();
    }
}
