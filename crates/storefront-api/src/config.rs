//! Server configuration read from the environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use storefront_event_store::batcher::BatcherConfig;
use storefront_event_store::database::DatabaseConfig;
use storefront_scheduler::poller::PollerConfig;

use crate::error::AppError;

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Transaction batcher tuning.
    pub batcher: BatcherConfig,
    /// Schedule poller tuning.
    pub poller: PollerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            host: "0.0.0.0".to_owned(),
            port: 3000,
            batcher: BatcherConfig::default(),
            poller: PollerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`; unset variables keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
            ..defaults.database
        };
        let batcher = BatcherConfig {
            flush_interval: millis(&lookup, "BATCHER_FLUSH_INTERVAL_MS", defaults.batcher.flush_interval)?,
            batch_size_threshold: parsed(
                &lookup,
                "BATCHER_SIZE_THRESHOLD",
                defaults.batcher.batch_size_threshold,
            )?,
            max_queue_depth: parsed(&lookup, "BATCHER_MAX_QUEUE_DEPTH", defaults.batcher.max_queue_depth)?,
        };
        let poller = PollerConfig {
            poll_interval: millis(&lookup, "SCHEDULER_POLL_INTERVAL_MS", defaults.poller.poll_interval)?,
            batch_size: parsed(&lookup, "SCHEDULER_BATCH_SIZE", defaults.poller.batch_size)?,
            max_retries: parsed(&lookup, "SCHEDULER_MAX_RETRIES", defaults.poller.max_retries)?,
            ..defaults.poller
        };

        if poller.batch_size == 0 {
            return Err(AppError::Config("SCHEDULER_BATCH_SIZE must be positive".into()));
        }
        if batcher.max_queue_depth == 0 {
            return Err(AppError::Config("BATCHER_MAX_QUEUE_DEPTH must be positive".into()));
        }

        Ok(Self {
            database,
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT", defaults.port)?,
            batcher,
            poller,
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name} must be a valid {}: {e}", std::any::type_name::<T>()))),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, AppError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    let ms: u64 = parsed(lookup, name, default_ms)?;
    if ms == 0 {
        return Err(AppError::Config(format!("{name} must be positive")));
    }
    Ok(Duration::from_millis(ms))
}
