//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// The aggregate's version after the transition this event records.
    pub version: i64,
    /// Correlation ID shared by every event of one command.
    pub correlation_id: Uuid,
    /// The user that issued the command.
    pub user_id: String,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Full before/after state carried by every event.
///
/// `prior_state` is `None` only for creation events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange<S> {
    /// State before the transition.
    pub prior_state: Option<S>,
    /// State after the transition.
    pub new_state: S,
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the namespaced event name, e.g. `product.archived`.
    fn event_name(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the payload cannot be
    /// represented as JSON.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Converts the event into its persisted form.
    ///
    /// # Errors
    ///
    /// Propagates payload serialization failures.
    fn to_stored(&self) -> Result<StoredEvent, DomainError> {
        let meta = self.metadata();
        Ok(StoredEvent {
            event_name: self.event_name().to_owned(),
            aggregate_id: meta.aggregate_id,
            version: meta.version,
            correlation_id: meta.correlation_id,
            user_id: meta.user_id.clone(),
            occurred_at: meta.occurred_at,
            payload: self.to_payload()?,
        })
    }
}

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Namespaced event name used for dispatch.
    pub event_name: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Version produced by this event.
    pub version: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The user that issued the command.
    pub user_id: String,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Serialized `StateChange` payload.
    pub payload: serde_json::Value,
}

impl StoredEvent {
    /// Returns the aggregate type prefix of the event name.
    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        self.event_name
            .split_once('.')
            .map_or(self.event_name.as_str(), |(prefix, _)| prefix)
    }

    /// Decodes the payload into a typed state change.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the payload does not match
    /// the state shape `S`.
    pub fn decode_payload<S: DeserializeOwned>(&self) -> Result<StateChange<S>, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::Infrastructure(format!(
                "event {} v{} payload decode failed: {e}",
                self.event_name, self.version
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    fn stored(name: &str, payload: serde_json::Value) -> StoredEvent {
        StoredEvent {
            event_name: name.to_owned(),
            aggregate_id: Uuid::new_v4(),
            version: 1,
            correlation_id: Uuid::new_v4(),
            user_id: "user-1".to_owned(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
            payload,
        }
    }

    #[test]
    fn test_state_change_serializes_camel_case_keys() {
        let change = StateChange {
            prior_state: None,
            new_state: Counter { value: 1 },
        };

        let json = serde_json::to_value(&change).unwrap();

        assert_eq!(json["priorState"], serde_json::Value::Null);
        assert_eq!(json["newState"]["value"], 1);
    }

    #[test]
    fn test_decode_payload_returns_typed_change() {
        let event = stored(
            "counter.incremented",
            serde_json::json!({"priorState": {"value": 1}, "newState": {"value": 2}}),
        );

        let change: StateChange<Counter> = event.decode_payload().unwrap();

        assert_eq!(change.prior_state, Some(Counter { value: 1 }));
        assert_eq!(change.new_state, Counter { value: 2 });
    }

    #[test]
    fn test_decode_payload_rejects_mismatched_shape() {
        let event = stored("counter.incremented", serde_json::json!({"unexpected": true}));

        let result = event.decode_payload::<Counter>();

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }

    #[test]
    fn test_aggregate_type_is_event_name_prefix() {
        let event = stored("schedule.executed", serde_json::Value::Null);

        assert_eq!(event.aggregate_type(), "schedule");
    }
}
