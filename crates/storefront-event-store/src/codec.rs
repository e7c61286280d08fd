//! Column decoding helpers shared by repositories and read-model queries.

use chrono::{DateTime, Utc};
use storefront_core::error::DomainError;
use uuid::Uuid;

/// Parses a UUID stored as text.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the column is not a UUID.
pub fn uuid_from_text(value: &str) -> Result<Uuid, DomainError> {
    Uuid::parse_str(value)
        .map_err(|e| DomainError::Infrastructure(format!("invalid uuid column {value:?}: {e}")))
}

/// Converts a unix-millisecond column into a timestamp.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the value is out of range.
pub fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>, DomainError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DomainError::Infrastructure(format!("timestamp out of range: {millis}")))
}

/// Parses a JSON column.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the text is not valid JSON.
pub fn json_from_text(value: &str) -> Result<serde_json::Value, DomainError> {
    Ok(serde_json::from_str(value)?)
}

/// Wraps a read-path database error.
pub fn db_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {err}"))
}
