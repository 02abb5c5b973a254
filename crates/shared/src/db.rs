//! Database utilities and connection management

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::{str::FromStr, time::Duration};

use crate::error::SharedError;

/// Default pool size; charge transactions are short and serialized per batch
const DEFAULT_MAX_CONNECTIONS: u32 = 3;

/// Database settings loaded from the environment
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Load from `DATABASE_URL` and `DATABASE_MAX_CONNECTIONS`, reading `.env` first if present
    pub fn from_env() -> Result<Self, SharedError> {
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| SharedError::MissingEnv("DATABASE_URL"))?;

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => raw.trim().parse().map_err(|_| SharedError::InvalidEnv {
                name: "DATABASE_MAX_CONNECTIONS",
                reason: format!("expected a positive integer, got {:?}", raw),
            })?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        if max_connections == 0 {
            return Err(SharedError::InvalidEnv {
                name: "DATABASE_MAX_CONNECTIONS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

/// Create a database connection pool
/// Note: Disables statement cache for PgBouncer compatibility
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    // PgBouncer in transaction mode doesn't support prepared statements
    let options = PgConnectOptions::from_str(&config.database_url)?.statement_cache_capacity(0);

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(300))
        .connect_with(options)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
