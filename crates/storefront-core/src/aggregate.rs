//! Aggregate root abstraction.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::snapshot::Snapshot;

/// Trait for aggregate roots that reload from snapshots.
///
/// A new aggregate starts at version 0 with exactly one creation event.
/// Every successful mutation appends one event and increments the version
/// by one; a rejected mutation leaves the aggregate untouched.
pub trait AggregateRoot: Sized + Send + Sync {
    /// Prefix used in event names, e.g. `product`.
    const AGGREGATE_TYPE: &'static str;

    /// The event type this aggregate produces.
    type Event: DomainEvent;

    /// Plain serializable projection of the aggregate's state.
    type State: Serialize + DeserializeOwned + Send;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of transitions after creation).
    fn version(&self) -> i64;

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);

    /// Returns a serializable copy of the current state.
    fn to_snapshot(&self) -> Self::State;

    /// Rebuilds the aggregate from a state at a known version.
    fn from_state(state: Self::State, version: i64) -> Self;

    /// Rebuilds the aggregate from its stored snapshot with no uncommitted
    /// events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the snapshot payload does not
    /// decode into `Self::State`.
    fn load_from_snapshot(snapshot: &Snapshot) -> Result<Self, DomainError> {
        let state = snapshot.state::<Self::State>()?;
        Ok(Self::from_state(state, snapshot.version))
    }
}
