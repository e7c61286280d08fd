//! Query handlers for the Scheduled Commands context.
//!
//! Queries read `schedules_read_model`. The poller uses [`find_due`] to pick
//! up work and re-checks each schedule against its snapshot before running
//! it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use storefront_core::error::DomainError;
use storefront_event_store::codec::{db_error, json_from_text, timestamp_from_millis, uuid_from_text};
use uuid::Uuid;

use crate::domain::aggregates::ScheduleStatus;

const SCHEDULE_COLUMNS: &str = "aggregate_id, target_aggregate_id, target_aggregate_type, \
     command_type, command_data, scheduled_for, status, retry_count, next_retry_at, created_by, \
     error_message, correlation_id, version, created_at, updated_at";

/// Read-only view of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleView {
    /// The schedule identifier.
    pub schedule_id: Uuid,
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
    /// Earliest instant of the next attempt, if one is planned.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// User that created the schedule.
    pub created_by: String,
    /// Message of the most recent failure.
    pub error_message: Option<String>,
    /// Correlation ID shared by the schedule's events.
    pub correlation_id: Uuid,
    /// Version of the last projected event.
    pub version: i64,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Instant of the last transition.
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    aggregate_id: String,
    target_aggregate_id: String,
    target_aggregate_type: String,
    command_type: String,
    command_data: String,
    scheduled_for: i64,
    status: String,
    retry_count: i64,
    next_retry_at: Option<i64>,
    created_by: String,
    error_message: Option<String>,
    correlation_id: String,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ScheduleRow> for ScheduleView {
    type Error = DomainError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            schedule_id: uuid_from_text(&row.aggregate_id)?,
            target_aggregate_id: uuid_from_text(&row.target_aggregate_id)?,
            target_aggregate_type: row.target_aggregate_type,
            command_type: row.command_type,
            command_data: json_from_text(&row.command_data)?,
            scheduled_for: timestamp_from_millis(row.scheduled_for)?,
            status: ScheduleStatus::parse(&row.status)?,
            retry_count: u32::try_from(row.retry_count).map_err(|_| {
                DomainError::Infrastructure(format!("invalid retry count: {}", row.retry_count))
            })?,
            next_retry_at: row.next_retry_at.map(timestamp_from_millis).transpose()?,
            created_by: row.created_by,
            error_message: row.error_message,
            correlation_id: uuid_from_text(&row.correlation_id)?,
            version: row.version,
            created_at: timestamp_from_millis(row.created_at)?,
            updated_at: timestamp_from_millis(row.updated_at)?,
        })
    }
}

fn into_views(rows: Vec<ScheduleRow>) -> Result<Vec<ScheduleView>, DomainError> {
    rows.into_iter().map(ScheduleView::try_from).collect()
}

/// Retrieves a schedule by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the schedule has not been
/// projected, or `DomainError::Infrastructure` if the read fails.
pub async fn get_schedule_by_id(pool: &SqlitePool, schedule_id: Uuid) -> Result<ScheduleView, DomainError> {
    let row: Option<ScheduleRow> = sqlx::query_as(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules_read_model WHERE aggregate_id = ?"
    ))
    .bind(schedule_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(db_error)?;

    row.map(ScheduleView::try_from)
        .transpose()?
        .ok_or(DomainError::AggregateNotFound(schedule_id))
}

/// Lists schedules in `status`, earliest first.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the read fails.
pub async fn list_schedules_by_status(
    pool: &SqlitePool,
    status: ScheduleStatus,
    limit: i64,
) -> Result<Vec<ScheduleView>, DomainError> {
    let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules_read_model \
         WHERE status = ? ORDER BY scheduled_for LIMIT ?"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    into_views(rows)
}

/// Pending schedules whose time has come and whose retry backoff, if any,
/// has elapsed, earliest first.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the read fails.
pub async fn find_due(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ScheduleView>, DomainError> {
    let now_millis = now.timestamp_millis();
    let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules_read_model \
         WHERE status = 'pending' AND scheduled_for <= ? \
           AND (next_retry_at IS NULL OR next_retry_at <= ?) \
         ORDER BY scheduled_for LIMIT ?"
    ))
    .bind(now_millis)
    .bind(now_millis)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    into_views(rows)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use storefront_core::clock::Clock;
    use storefront_event_store::batcher::{BatcherConfig, BatcherHandle, TransactionBatcher};
    use storefront_event_store::database::connect_in_memory;
    use storefront_event_store::unit_of_work::UnitOfWork;
    use storefront_test_support::FixedClock;

    use super::*;
    use crate::application::command_handlers::{handle_cancel_schedule, handle_create_schedule};
    use crate::application::projector::ScheduleProjector;
    use crate::domain::commands::{CancelSchedule, CreateSchedule};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    async fn setup() -> (UnitOfWork, BatcherHandle) {
        let pool = connect_in_memory().await.unwrap();
        let batcher = TransactionBatcher::new(
            pool.clone(),
            BatcherConfig {
                flush_interval: Duration::from_millis(10),
                ..BatcherConfig::default()
            },
        );
        let handle = batcher.start();
        let uow = UnitOfWork::new(pool, batcher).with_projector(ScheduleProjector::factory());
        (uow, handle)
    }

    async fn create(uow: &UnitOfWork, scheduled_for: DateTime<Utc>) -> Uuid {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(start()));
        let schedule_id = Uuid::new_v4();
        uow.with_transaction(|repos| async move {
            let command = CreateSchedule {
                correlation_id: Uuid::new_v4(),
                user_id: "merchant-1".into(),
                schedule_id,
                target_aggregate_id: Uuid::new_v4(),
                target_aggregate_type: "product".into(),
                command_type: "product.publish".into(),
                command_data: serde_json::json!({"product_id": schedule_id}),
                scheduled_for,
            };
            handle_create_schedule(&command, clock.as_ref(), &repos).await?;
            Ok(())
        })
        .await
        .unwrap();
        schedule_id
    }

    #[tokio::test]
    async fn test_get_schedule_by_id_returns_projected_row() {
        // Arrange
        let (uow, handle) = setup().await;
        let scheduled_for = start() + TimeDelta::minutes(5);

        // Act
        let schedule_id = create(&uow, scheduled_for).await;

        // Assert
        let view = get_schedule_by_id(uow.pool(), schedule_id).await.unwrap();
        assert_eq!(view.status, ScheduleStatus::Pending);
        assert_eq!(view.scheduled_for, scheduled_for);
        assert_eq!(view.command_type, "product.publish");
        assert_eq!(view.command_data["product_id"], schedule_id.to_string());
        assert_eq!(view.retry_count, 0);
        assert_eq!(view.next_retry_at, None);
        assert_eq!(view.created_by, "merchant-1");
        assert_eq!(view.version, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_find_due_returns_only_pending_schedules_whose_time_has_come() {
        // Arrange
        let (uow, handle) = setup().await;
        let late = create(&uow, start() - TimeDelta::minutes(1)).await;
        let earliest = create(&uow, start() - TimeDelta::minutes(10)).await;
        let _future = create(&uow, start() + TimeDelta::minutes(10)).await;
        let cancelled = create(&uow, start() - TimeDelta::minutes(5)).await;
        uow.with_transaction(|repos| async move {
            let command = CancelSchedule {
                correlation_id: Uuid::new_v4(),
                user_id: "merchant-1".into(),
                schedule_id: cancelled,
                expected_version: 0,
            };
            handle_cancel_schedule(&command, &FixedClock(start()), &repos).await?;
            Ok(())
        })
        .await
        .unwrap();

        // Act
        let due = find_due(uow.pool(), start(), 10).await.unwrap();

        // Assert
        let ids: Vec<Uuid> = due.iter().map(|v| v.schedule_id).collect();
        assert_eq!(ids, vec![earliest, late]);
        let cancelled_rows = list_schedules_by_status(uow.pool(), ScheduleStatus::Cancelled, 10)
            .await
            .unwrap();
        assert_eq!(cancelled_rows.len(), 1);
        assert_eq!(cancelled_rows[0].schedule_id, cancelled);
        assert_eq!(cancelled_rows[0].version, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_find_due_honours_limit() {
        let (uow, handle) = setup().await;
        for minutes in 1..=3 {
            create(&uow, start() - TimeDelta::minutes(minutes)).await;
        }

        let due = find_due(uow.pool(), start(), 2).await.unwrap();

        assert_eq!(due.len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_schedule_by_id_returns_not_found_for_unknown_schedule() {
        let pool = connect_in_memory().await.unwrap();
        let schedule_id = Uuid::new_v4();

        let result = get_schedule_by_id(&pool, schedule_id).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(id)) if id == schedule_id));
    }
}
