//! Minimal aggregate used by this crate's tests.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use storefront_core::aggregate::AggregateRoot;
use storefront_core::error::DomainError;
use storefront_core::event::{DomainEvent, EventMetadata, StateChange};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub id: Uuid,
    pub count: u32,
}

#[derive(Debug)]
pub struct CounterEvent {
    name: &'static str,
    metadata: EventMetadata,
    change: StateChange<CounterState>,
}

impl DomainEvent for CounterEvent {
    fn event_name(&self) -> &'static str {
        self.name
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::to_value(&self.change)?)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[derive(Debug)]
pub struct Counter {
    state: CounterState,
    version: i64,
    correlation_id: Uuid,
    uncommitted: Vec<CounterEvent>,
}

impl Counter {
    pub fn create(id: Uuid) -> Self {
        let mut counter = Self {
            state: CounterState { id, count: 0 },
            version: 0,
            correlation_id: Uuid::new_v4(),
            uncommitted: Vec::new(),
        };
        counter.record("counter.created", None);
        counter
    }

    pub fn increment(&mut self) {
        let prior = self.state.clone();
        self.state.count += 1;
        self.version += 1;
        self.record("counter.incremented", Some(prior));
    }

    pub fn count(&self) -> u32 {
        self.state.count
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn record(&mut self, name: &'static str, prior_state: Option<CounterState>) {
        self.uncommitted.push(CounterEvent {
            name,
            metadata: EventMetadata {
                aggregate_id: self.state.id,
                version: self.version,
                correlation_id: self.correlation_id,
                user_id: "tester".to_owned(),
                occurred_at: Utc::now(),
            },
            change: StateChange {
                prior_state,
                new_state: self.state.clone(),
            },
        });
    }
}

impl AggregateRoot for Counter {
    const AGGREGATE_TYPE: &'static str = "counter";
    type Event = CounterEvent;
    type State = CounterState;

    fn aggregate_id(&self) -> Uuid {
        self.state.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }

    fn to_snapshot(&self) -> Self::State {
        self.state.clone()
    }

    fn from_state(state: Self::State, version: i64) -> Self {
        Self {
            state,
            version,
            correlation_id: Uuid::new_v4(),
            uncommitted: Vec::new(),
        }
    }
}
