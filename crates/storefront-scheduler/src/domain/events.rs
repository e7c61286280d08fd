//! Domain events for the Scheduled Commands context.

use storefront_core::error::DomainError;
use storefront_core::event::{DomainEvent, EventMetadata, StateChange};

use super::aggregates::ScheduleState;

/// Event type constant for schedule creation.
pub const SCHEDULE_CREATED_EVENT_TYPE: &str = "schedule.created";
/// Event type constant for successful execution.
pub const SCHEDULE_EXECUTED_EVENT_TYPE: &str = "schedule.executed";
/// Event type constant for a failed attempt that will be retried.
pub const SCHEDULE_RESCHEDULED_EVENT_TYPE: &str = "schedule.rescheduled";
/// Event type constant for terminal failure.
pub const SCHEDULE_FAILED_EVENT_TYPE: &str = "schedule.failed";
/// Event type constant for cancellation.
pub const SCHEDULE_CANCELLED_EVENT_TYPE: &str = "schedule.cancelled";

/// The transitions a schedule can go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEventKind {
    /// A pending schedule was recorded.
    Created,
    /// The scheduled command ran and committed.
    Executed,
    /// An attempt failed; another is planned.
    Rescheduled,
    /// No further attempts will be made.
    Failed,
    /// The schedule was withdrawn.
    Cancelled,
}

impl ScheduleEventKind {
    /// The namespaced event name.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Created => SCHEDULE_CREATED_EVENT_TYPE,
            Self::Executed => SCHEDULE_EXECUTED_EVENT_TYPE,
            Self::Rescheduled => SCHEDULE_RESCHEDULED_EVENT_TYPE,
            Self::Failed => SCHEDULE_FAILED_EVENT_TYPE,
            Self::Cancelled => SCHEDULE_CANCELLED_EVENT_TYPE,
        }
    }

    /// Maps a stored event name back to its kind.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            SCHEDULE_CREATED_EVENT_TYPE => Some(Self::Created),
            SCHEDULE_EXECUTED_EVENT_TYPE => Some(Self::Executed),
            SCHEDULE_RESCHEDULED_EVENT_TYPE => Some(Self::Rescheduled),
            SCHEDULE_FAILED_EVENT_TYPE => Some(Self::Failed),
            SCHEDULE_CANCELLED_EVENT_TYPE => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Domain event envelope for the Scheduled Commands context.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Which transition happened.
    pub kind: ScheduleEventKind,
    /// Schedule state before and after.
    pub change: StateChange<ScheduleState>,
}

impl DomainEvent for ScheduleEvent {
    fn event_name(&self) -> &'static str {
        self.kind.event_name()
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::to_value(&self.change)?)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
