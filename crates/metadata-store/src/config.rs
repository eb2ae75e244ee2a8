//! Connection settings for the PostgreSQL backend.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::Result;

/// Connection pool configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: connection string (default: `"postgres://localhost/metadata"`)
/// - `METADATA_DB_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `METADATA_DB_ACQUIRE_TIMEOUT_SECS`: wait for a free connection (default: `30`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/metadata";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

impl PostgresConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: lookup("METADATA_DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(
                lookup("METADATA_DB_ACQUIRE_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            ),
        }
    }

    /// Opens a connection pool with these settings.
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await?;

        tracing::info!(max_connections = self.max_connections, "connected to postgres");
        Ok(pool)
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}
