//! Command handlers for the Scheduled Commands context.

use std::sync::Arc;

use async_trait::async_trait;
use storefront_core::clock::Clock;
use storefront_core::command::{AccessLevel, Command};
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;
use storefront_event_store::handler::{CommandHandler, TransactionalService};
use storefront_event_store::repository::Repositories;
use storefront_event_store::unit_of_work::UnitOfWork;
use uuid::Uuid;

use crate::domain::aggregates::{NewSchedule, Schedule};
use crate::domain::commands::{CancelSchedule, CreateSchedule};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct ScheduleCommandResult {
    /// The schedule affected by the command.
    pub aggregate_id: Uuid,
    /// The events staged for persistence.
    pub stored_events: Vec<StoredEvent>,
}

/// Handles the `CreateSchedule` command.
///
/// # Errors
///
/// Returns `DomainError::InvariantViolation` if the schedule ID is taken,
/// `DomainError::Validation` for a blank command or target type, or an
/// infrastructure error from the snapshot read.
pub async fn handle_create_schedule(
    command: &CreateSchedule,
    clock: &dyn Clock,
    repos: &Repositories,
) -> Result<ScheduleCommandResult, DomainError> {
    if repos
        .find_aggregate::<Schedule>(command.schedule_id)
        .await?
        .is_some()
    {
        return Err(DomainError::InvariantViolation(format!(
            "schedule {} already exists",
            command.schedule_id
        )));
    }

    let mut schedule = Schedule::create(
        NewSchedule {
            id: command.schedule_id,
            target_aggregate_id: command.target_aggregate_id,
            target_aggregate_type: command.target_aggregate_type.clone(),
            command_type: command.command_type.clone(),
            command_data: command.command_data.clone(),
            scheduled_for: command.scheduled_for,
        },
        &command.context(),
        clock,
    )?;

    let stored_events = repos.save_aggregate(&mut schedule)?;
    Ok(ScheduleCommandResult {
        aggregate_id: command.schedule_id,
        stored_events,
    })
}

/// Handles the `CancelSchedule` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the schedule does not exist,
/// `DomainError::ConcurrencyConflict` if it moved past `expected_version`,
/// or `DomainError::InvariantViolation` if it was already executed or
/// cancelled.
pub async fn handle_cancel_schedule(
    command: &CancelSchedule,
    clock: &dyn Clock,
    repos: &Repositories,
) -> Result<ScheduleCommandResult, DomainError> {
    let mut schedule: Schedule = repos
        .load_aggregate_at(command.schedule_id, command.expected_version)
        .await?;

    schedule.cancel(&command.context(), clock)?;

    let stored_events = repos.save_aggregate(&mut schedule)?;
    Ok(ScheduleCommandResult {
        aggregate_id: command.schedule_id,
        stored_events,
    })
}

/// Records new schedules.
#[derive(Clone)]
pub struct CreateScheduleHandler {
    clock: Arc<dyn Clock>,
}

impl CreateScheduleHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl std::fmt::Debug for CreateScheduleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateScheduleHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandHandler for CreateScheduleHandler {
    type Command = CreateSchedule;

    async fn handle(&self, repos: &Repositories, command: CreateSchedule) -> Result<(), DomainError> {
        let result = handle_create_schedule(&command, self.clock.as_ref(), repos).await?;
        tracing::debug!(
            schedule_id = %result.aggregate_id,
            command_type = %command.command_type,
            scheduled_for = %command.scheduled_for,
            "schedule staged"
        );
        Ok(())
    }
}

/// Cancels schedules.
#[derive(Clone)]
pub struct CancelScheduleHandler {
    clock: Arc<dyn Clock>,
}

impl CancelScheduleHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl std::fmt::Debug for CancelScheduleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScheduleHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandHandler for CancelScheduleHandler {
    type Command = CancelSchedule;

    async fn handle(&self, repos: &Repositories, command: CancelSchedule) -> Result<(), DomainError> {
        handle_cancel_schedule(&command, self.clock.as_ref(), repos)
            .await
            .map(|_| ())
    }
}

/// Service creating schedules in their own unit of work.
pub type CreateScheduleService = TransactionalService<CreateScheduleHandler>;

/// Service cancelling schedules in their own unit of work.
pub type CancelScheduleService = TransactionalService<CancelScheduleHandler>;

/// Builds the create-schedule service. Callers must be authenticated.
#[must_use]
pub fn create_schedule_service(uow: UnitOfWork, clock: Arc<dyn Clock>) -> CreateScheduleService {
    TransactionalService::new(uow, CreateScheduleHandler::new(clock), AccessLevel::Authenticated)
}

/// Builds the cancel-schedule service. Callers must be authenticated.
#[must_use]
pub fn cancel_schedule_service(uow: UnitOfWork, clock: Arc<dyn Clock>) -> CancelScheduleService {
    TransactionalService::new(uow, CancelScheduleHandler::new(clock), AccessLevel::Authenticated)
}
