//! Aggregate roots for the Scheduled Commands context.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::aggregate::AggregateRoot;
use storefront_core::clock::Clock;
use storefront_core::command::CommandContext;
use storefront_core::error::DomainError;
use storefront_core::event::{EventMetadata, StateChange};
use uuid::Uuid;

use super::events::{ScheduleEvent, ScheduleEventKind};
use crate::retry::RetryPolicy;

/// User recorded on transitions made by the poller.
pub const SCHEDULER_USER: &str = "scheduler";

/// Lifecycle of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Waiting to become due (or for its next retry).
    Pending,
    /// Ran successfully. Terminal.
    Executed,
    /// Gave up. Terminal unless cancelled.
    Failed,
    /// Withdrawn. Terminal.
    Cancelled,
}

impl ScheduleStatus {
    /// Column value in the read model.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a read-model column value.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for unknown values.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "pending" => Ok(Self::Pending),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::Validation(format!(
                "unknown schedule status: {other}"
            ))),
        }
    }
}

/// Serializable state of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    /// Schedule identifier.
    pub id: Uuid,
    /// Correlation ID shared by every event of this schedule.
    pub correlation_id: Uuid,
    /// Aggregate the scheduled command targets.
    pub target_aggregate_id: Uuid,
    /// Type of that aggregate.
    pub target_aggregate_type: String,
    /// Registry key of the handler to run.
    pub command_type: String,
    /// Command body handed to the handler.
    pub command_data: serde_json::Value,
    /// Earliest execution instant.
    pub scheduled_for: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ScheduleStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Earliest instant of the next attempt after a failure.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// User that created the schedule.
    pub created_by: String,
    /// Message of the most recent failure.
    pub error_message: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Instant of the last transition.
    pub updated_at: DateTime<Utc>,
}

/// Input for [`Schedule::create`].
#[derive(Debug, Clone)]
pub struct NewSchedule {
    /// Schedule identifier.
    pub id: Uuid,
    /// Aggregate the scheduled command targets.
    pub target_aggregate_id: Uuid,
    /// Type of that aggregate.
    pub target_aggregate_type: String,
    /// Registry key of the handler to run.
    pub command_type: String,
    /// Command body handed to the handler.
    pub command_data: serde_json::Value,
    /// Earliest execution instant.
    pub scheduled_for: DateTime<Utc>,
}

/// What a recorded failure led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending; due again at the given instant.
    Retrying {
        /// Earliest instant of the next attempt.
        next_retry_at: DateTime<Utc>,
    },
    /// Retries exhausted; the schedule is failed.
    Exhausted,
}

/// The aggregate root for a scheduled command.
#[derive(Debug)]
pub struct Schedule {
    state: ScheduleState,
    version: i64,
    uncommitted_events: Vec<ScheduleEvent>,
}

impl Schedule {
    /// Records a pending schedule, producing `schedule.created` at version 0.
    /// The command's correlation ID becomes the schedule's own.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the command type or target type
    /// is blank.
    pub fn create(
        new: NewSchedule,
        context: &CommandContext,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        if new.command_type.trim().is_empty() {
            return Err(DomainError::Validation("command type must not be empty".into()));
        }
        if new.target_aggregate_type.trim().is_empty() {
            return Err(DomainError::Validation(
                "target aggregate type must not be empty".into(),
            ));
        }

        let now = clock.now();
        let mut schedule = Self {
            state: ScheduleState {
                id: new.id,
                correlation_id: context.correlation_id,
                target_aggregate_id: new.target_aggregate_id,
                target_aggregate_type: new.target_aggregate_type,
                command_type: new.command_type,
                command_data: new.command_data,
                scheduled_for: new.scheduled_for,
                status: ScheduleStatus::Pending,
                retry_count: 0,
                next_retry_at: None,
                created_by: context.user_id.clone(),
                error_message: None,
                created_at: now,
                updated_at: now,
            },
            version: 0,
            uncommitted_events: Vec::new(),
        };
        schedule.record(ScheduleEventKind::Created, None, &context.user_id, now);
        Ok(schedule)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Returns `true` if the poller should run the schedule at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.status == ScheduleStatus::Pending
            && self.state.scheduled_for <= now
            && self.state.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Marks the schedule executed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` unless the schedule is
    /// pending.
    pub fn mark_executed(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_pending("execute")?;
        let next = ScheduleState {
            status: ScheduleStatus::Executed,
            next_retry_at: None,
            ..self.state.clone()
        };
        self.transition(ScheduleEventKind::Executed, next, SCHEDULER_USER, clock);
        Ok(())
    }

    /// Records a failed attempt. The schedule returns to pending with a
    /// backoff until `max_retries` failures have accumulated, then fails.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` unless the schedule is
    /// pending.
    pub fn record_failure(
        &mut self,
        error: &str,
        max_retries: u32,
        policy: &RetryPolicy,
        clock: &dyn Clock,
    ) -> Result<FailureOutcome, DomainError> {
        self.ensure_pending("record a failure for")?;
        let retry_count = self.state.retry_count.saturating_add(1);

        if retry_count >= max_retries {
            let next = ScheduleState {
                status: ScheduleStatus::Failed,
                retry_count,
                next_retry_at: None,
                error_message: Some(error.to_owned()),
                ..self.state.clone()
            };
            self.transition(ScheduleEventKind::Failed, next, SCHEDULER_USER, clock);
            return Ok(FailureOutcome::Exhausted);
        }

        let delay = TimeDelta::from_std(policy.delay_for(retry_count))
            .map_err(|e| DomainError::Infrastructure(format!("retry delay out of range: {e}")))?;
        let next_retry_at = clock.now() + delay;
        let next = ScheduleState {
            retry_count,
            next_retry_at: Some(next_retry_at),
            error_message: Some(error.to_owned()),
            ..self.state.clone()
        };
        self.transition(ScheduleEventKind::Rescheduled, next, SCHEDULER_USER, clock);
        Ok(FailureOutcome::Retrying { next_retry_at })
    }

    /// Fails the schedule immediately, counting one attempt. Used when no
    /// handler is registered for its command type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` unless the schedule is
    /// pending.
    pub fn fail_unhandled(&mut self, error: &str, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_pending("fail")?;
        let next = ScheduleState {
            status: ScheduleStatus::Failed,
            retry_count: self.state.retry_count.saturating_add(1),
            next_retry_at: None,
            error_message: Some(error.to_owned()),
            ..self.state.clone()
        };
        self.transition(ScheduleEventKind::Failed, next, SCHEDULER_USER, clock);
        Ok(())
    }

    /// Cancels a pending or failed schedule.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if the schedule was already
    /// executed or cancelled.
    pub fn cancel(&mut self, context: &CommandContext, clock: &dyn Clock) -> Result<(), DomainError> {
        match self.state.status {
            ScheduleStatus::Executed => Err(DomainError::InvariantViolation(
                "cannot cancel an already executed schedule".into(),
            )),
            ScheduleStatus::Cancelled => Err(DomainError::InvariantViolation(
                "schedule is already cancelled".into(),
            )),
            ScheduleStatus::Pending | ScheduleStatus::Failed => {
                let next = ScheduleState {
                    status: ScheduleStatus::Cancelled,
                    next_retry_at: None,
                    ..self.state.clone()
                };
                self.transition(ScheduleEventKind::Cancelled, next, &context.user_id, clock);
                Ok(())
            }
        }
    }

    fn ensure_pending(&self, action: &str) -> Result<(), DomainError> {
        if self.state.status == ScheduleStatus::Pending {
            Ok(())
        } else {
            Err(DomainError::InvariantViolation(format!(
                "cannot {action} a schedule that is {}",
                self.state.status.as_str()
            )))
        }
    }

    fn transition(
        &mut self,
        kind: ScheduleEventKind,
        mut next: ScheduleState,
        user_id: &str,
        clock: &dyn Clock,
    ) {
        let now = clock.now();
        next.updated_at = now;
        let prior = std::mem::replace(&mut self.state, next);
        self.version += 1;
        self.record(kind, Some(prior), user_id, now);
    }

    fn record(
        &mut self,
        kind: ScheduleEventKind,
        prior_state: Option<ScheduleState>,
        user_id: &str,
        occurred_at: DateTime<Utc>,
    ) {
        self.uncommitted_events.push(ScheduleEvent {
            metadata: EventMetadata {
                aggregate_id: self.state.id,
                version: self.version,
                correlation_id: self.state.correlation_id,
                user_id: user_id.to_owned(),
                occurred_at,
            },
            kind,
            change: StateChange {
                prior_state,
                new_state: self.state.clone(),
            },
        });
    }
}

impl AggregateRoot for Schedule {
    const AGGREGATE_TYPE: &'static str = "schedule";
    type Event = ScheduleEvent;
    type State = ScheduleState;

    fn aggregate_id(&self) -> Uuid {
        self.state.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }

    fn to_snapshot(&self) -> Self::State {
        self.state.clone()
    }

    fn from_state(state: Self::State, version: i64) -> Self {
        Self {
            state,
            version,
            uncommitted_events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use storefront_core::event::DomainEvent;
    use storefront_test_support::{FixedClock, StepClock};

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn new_schedule(scheduled_for: DateTime<Utc>) -> NewSchedule {
        NewSchedule {
            id: Uuid::new_v4(),
            target_aggregate_id: Uuid::new_v4(),
            target_aggregate_type: "product".into(),
            command_type: "product.publish".into(),
            command_data: serde_json::json!({"product_id": Uuid::new_v4()}),
            scheduled_for,
        }
    }

    fn pending(clock: &dyn Clock) -> Schedule {
        Schedule::create(
            new_schedule(clock.now()),
            &CommandContext::new("merchant-1"),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_create_records_pending_schedule_with_own_correlation_id() {
        // Arrange
        let clock = FixedClock(start());
        let context = CommandContext::new("merchant-1");

        // Act
        let schedule =
            Schedule::create(new_schedule(start() + TimeDelta::hours(1)), &context, &clock).unwrap();

        // Assert
        assert_eq!(schedule.version(), 0);
        assert_eq!(schedule.state().status, ScheduleStatus::Pending);
        assert_eq!(schedule.state().created_by, "merchant-1");
        assert_eq!(schedule.state().correlation_id, context.correlation_id);
        let events = schedule.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "schedule.created");
        assert_eq!(events[0].metadata().version, 0);
        assert!(!schedule.is_due(start()));
        assert!(schedule.is_due(start() + TimeDelta::hours(1)));
    }

    #[test]
    fn test_mark_executed_is_terminal() {
        // Arrange
        let clock = FixedClock(start());
        let mut schedule = pending(&clock);

        // Act
        schedule.mark_executed(&clock).unwrap();
        let again = schedule.mark_executed(&clock);

        // Assert
        assert_eq!(schedule.state().status, ScheduleStatus::Executed);
        assert_eq!(schedule.version(), 1);
        assert!(matches!(again, Err(DomainError::InvariantViolation(_))));
        let executed = &schedule.uncommitted_events()[1];
        assert_eq!(executed.event_name(), "schedule.executed");
        assert_eq!(executed.metadata().user_id, SCHEDULER_USER);
        assert_eq!(executed.metadata().correlation_id, schedule.state().correlation_id);
    }

    #[test]
    fn test_record_failure_backs_off_then_exhausts() {
        // Arrange
        let clock = StepClock::new(start());
        let mut schedule = pending(&clock);
        let policy = RetryPolicy::default();

        // Act
        let first = schedule.record_failure("boom", 3, &policy, &clock).unwrap();
        clock.advance(TimeDelta::seconds(5));
        let second = schedule.record_failure("boom", 3, &policy, &clock).unwrap();
        clock.advance(TimeDelta::seconds(10));
        let third = schedule.record_failure("still boom", 3, &policy, &clock).unwrap();

        // Assert
        assert_eq!(
            first,
            FailureOutcome::Retrying {
                next_retry_at: start() + TimeDelta::seconds(5)
            }
        );
        assert_eq!(
            second,
            FailureOutcome::Retrying {
                next_retry_at: start() + TimeDelta::seconds(15)
            }
        );
        assert_eq!(third, FailureOutcome::Exhausted);
        let state = schedule.state();
        assert_eq!(state.status, ScheduleStatus::Failed);
        assert_eq!(state.retry_count, 3);
        assert!(state.next_retry_at.is_none());
        assert_eq!(state.error_message.as_deref(), Some("still boom"));
        let names: Vec<&str> = schedule
            .uncommitted_events()
            .iter()
            .map(DomainEvent::event_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "schedule.created",
                "schedule.rescheduled",
                "schedule.rescheduled",
                "schedule.failed"
            ]
        );
    }

    #[test]
    fn test_rescheduled_schedule_is_not_due_before_next_retry() {
        let clock = StepClock::new(start());
        let mut schedule = pending(&clock);

        schedule
            .record_failure("boom", 3, &RetryPolicy::default(), &clock)
            .unwrap();

        assert!(!schedule.is_due(start() + TimeDelta::seconds(4)));
        assert!(schedule.is_due(start() + TimeDelta::seconds(5)));
    }

    #[test]
    fn test_fail_unhandled_counts_one_attempt_without_retry() {
        let clock = FixedClock(start());
        let mut schedule = pending(&clock);

        schedule.fail_unhandled("no handler", &clock).unwrap();

        let state = schedule.state();
        assert_eq!(state.status, ScheduleStatus::Failed);
        assert_eq!(state.retry_count, 1);
        assert!(state.next_retry_at.is_none());
    }

    #[test]
    fn test_cancel_rules() {
        // Arrange
        let clock = FixedClock(start());
        let context = CommandContext::new("merchant-2");
        let mut cancellable = pending(&clock);
        let mut executed = pending(&clock);
        executed.mark_executed(&clock).unwrap();
        let mut failed = pending(&clock);
        failed.fail_unhandled("no handler", &clock).unwrap();

        // Act
        cancellable.cancel(&context, &clock).unwrap();
        let twice = cancellable.cancel(&context, &clock);
        let after_execution = executed.cancel(&context, &clock);
        let after_failure = failed.cancel(&context, &clock);

        // Assert
        assert_eq!(cancellable.state().status, ScheduleStatus::Cancelled);
        assert!(matches!(twice, Err(DomainError::InvariantViolation(msg)) if msg == "schedule is already cancelled"));
        assert!(matches!(after_execution, Err(DomainError::InvariantViolation(msg)) if msg == "cannot cancel an already executed schedule"));
        assert!(after_failure.is_ok());
        assert_eq!(executed.version(), 1);
        let cancelled = cancellable.uncommitted_events().last().unwrap();
        assert_eq!(cancelled.metadata().user_id, "merchant-2");
    }

    #[test]
    fn test_blank_command_type_is_rejected() {
        let clock = FixedClock(start());
        let mut new = new_schedule(start());
        new.command_type = "  ".into();

        let result = Schedule::create(new, &CommandContext::new("merchant-1"), &clock);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}
