//! SQLite connection pool setup.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use storefront_core::error::DomainError;

use crate::schema::apply_schema;

/// URL that selects a private in-memory database.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Connection settings for the system-of-record database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite://path/to/file.db` or [`IN_MEMORY_URL`].
    pub url: String,
    /// Upper bound on pooled connections (readers plus the batcher's writer).
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://storefront.db".to_owned(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens the pool described by `config` and applies the schema.
///
/// File databases run in WAL mode with `synchronous = NORMAL` so readers
/// never block the batcher's single writer.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the URL is invalid, the database
/// cannot be opened, or the schema cannot be applied.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, DomainError> {
    if config.url == IN_MEMORY_URL {
        return connect_in_memory().await;
    }

    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| DomainError::Infrastructure(format!("invalid database url: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("failed to open database: {e}")))?;

    apply_schema(&pool).await?;
    tracing::info!(
        url = %config.url,
        max_connections = config.max_connections,
        "database connection established (SQLite WAL)"
    );
    Ok(pool)
}

/// Opens a private in-memory database with the schema applied.
///
/// The pool holds exactly one connection that never expires; closing it
/// would discard the database.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the database cannot be opened.
pub async fn connect_in_memory() -> Result<SqlitePool, DomainError> {
    let options = SqliteConnectOptions::from_str(IN_MEMORY_URL)
        .map_err(|e| DomainError::Infrastructure(format!("invalid database url: {e}")))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("failed to open database: {e}")))?;

    apply_schema(&pool).await?;
    Ok(pool)
}
