//! Snapshot representation.

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DomainError;

/// Latest materialized state of one aggregate.
///
/// One row per aggregate, replaced on every successful command.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Aggregate identifier (primary key).
    pub aggregate_id: Uuid,
    /// Correlation ID of the event that produced this snapshot.
    pub correlation_id: Uuid,
    /// Aggregate version at the time of the snapshot.
    pub version: i64,
    /// Serialized aggregate state.
    pub payload: serde_json::Value,
}

impl Snapshot {
    /// Deserializes the payload into the aggregate's state type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the payload does not match `S`.
    pub fn state<S: DeserializeOwned>(&self) -> Result<S, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::Infrastructure(format!(
                "snapshot for {} could not be decoded: {e}",
                self.aggregate_id
            ))
        })
    }
}
