//! Shared application state.

use std::sync::Arc;

use sqlx::SqlitePool;
use storefront_core::clock::Clock;
use storefront_event_store::unit_of_work::UnitOfWork;
use storefront_scheduler::application::command_handlers::{
    CancelScheduleService, CreateScheduleService, cancel_schedule_service, create_schedule_service,
};

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// SQLite read pool.
    pub db_pool: SqlitePool,
    /// Creates schedules.
    pub create_schedule: CreateScheduleService,
    /// Cancels schedules.
    pub cancel_schedule: CancelScheduleService,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(db_pool: SqlitePool, uow: &UnitOfWork, clock: Arc<dyn Clock>) -> Self {
        Self {
            db_pool,
            create_schedule: create_schedule_service(uow.clone(), Arc::clone(&clock)),
            cancel_schedule: cancel_schedule_service(uow.clone(), clock),
        }
    }
}
