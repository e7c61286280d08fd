//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
///
/// Cloneable so a single infrastructure failure can settle every batch that
/// was in flight when it happened.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// An aggregate state-machine precondition was not met.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed command input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The physical transaction for a batch failed.
    #[error("batch execution failed: {0}")]
    BatchExecution(String),

    /// The transaction batcher queue is full.
    #[error("transaction queue is full (max depth {max_queue_depth}); retry later")]
    Backpressure {
        /// The configured queue depth limit.
        max_queue_depth: usize,
    },

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infrastructure(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_conflict_message_names_both_versions() {
        let aggregate_id = Uuid::new_v4();
        let err = DomainError::ConcurrencyConflict {
            aggregate_id,
            expected: 3,
            actual: 4,
        };

        let message = err.to_string();

        assert!(message.contains(&aggregate_id.to_string()));
        assert!(message.contains("expected version 3"));
        assert!(message.contains("found 4"));
    }

    #[test]
    fn test_serde_error_converts_to_infrastructure() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();

        let err = DomainError::from(parse_err);

        assert!(matches!(err, DomainError::Infrastructure(_)));
    }
}
