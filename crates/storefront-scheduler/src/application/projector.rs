//! Schedule read-model projector.

use std::sync::Arc;

use async_trait::async_trait;
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;
use storefront_event_store::batch::{BatchWriter, QueuedCommand, SqlValue, WriteKind};
use storefront_event_store::projection::{Projector, ProjectorFactory};
use storefront_event_store::repository::Repositories;

use crate::domain::aggregates::ScheduleState;
use crate::domain::events::ScheduleEventKind;

const UPSERT_SCHEDULE: &str = r"
INSERT INTO schedules_read_model (
    aggregate_id, target_aggregate_id, target_aggregate_type, command_type, command_data,
    scheduled_for, status, retry_count, next_retry_at, created_by, error_message,
    correlation_id, version, created_at, updated_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (aggregate_id) DO UPDATE SET
    status = excluded.status,
    retry_count = excluded.retry_count,
    next_retry_at = excluded.next_retry_at,
    error_message = excluded.error_message,
    version = excluded.version,
    updated_at = excluded.updated_at
";

/// Keeps `schedules_read_model` in step with schedule events.
#[derive(Debug, Clone)]
pub struct ScheduleProjector {
    writer: BatchWriter,
}

impl ScheduleProjector {
    /// Creates a projector writing into `writer`'s batch.
    #[must_use]
    pub fn new(writer: BatchWriter) -> Self {
        Self { writer }
    }

    /// Factory for registration with a unit of work.
    #[must_use]
    pub fn factory() -> ProjectorFactory {
        Arc::new(|repos: &Repositories| {
            vec![Box::new(Self::new(repos.writer().clone())) as Box<dyn Projector>]
        })
    }
}

#[async_trait]
impl Projector for ScheduleProjector {
    fn name(&self) -> &'static str {
        "schedules"
    }

    async fn execute(&self, event: &StoredEvent) -> Result<(), DomainError> {
        let Some(kind) = ScheduleEventKind::from_event_name(&event.event_name) else {
            return Ok(());
        };
        let state: ScheduleState = event.decode_payload::<ScheduleState>()?.new_state;

        self.writer.push(QueuedCommand::new(
            UPSERT_SCHEDULE,
            vec![
                state.id.into(),
                state.target_aggregate_id.into(),
                state.target_aggregate_type.into(),
                state.command_type.into(),
                (&state.command_data).into(),
                state.scheduled_for.into(),
                state.status.as_str().into(),
                SqlValue::Integer(i64::from(state.retry_count)),
                state.next_retry_at.map_or(SqlValue::Null, SqlValue::from),
                state.created_by.into(),
                state.error_message.map_or(SqlValue::Null, SqlValue::from),
                state.correlation_id.into(),
                event.version.into(),
                state.created_at.into(),
                state.updated_at.into(),
            ],
            WriteKind::ReadModel,
        ));
        tracing::trace!(?kind, schedule_id = %event.aggregate_id, version = event.version, "schedule projected");
        Ok(())
    }
}
