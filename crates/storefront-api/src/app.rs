//! Process wiring: database, batcher, unit of work, poller, router.

use std::sync::Arc;

use axum::Router;
use sqlx::SqlitePool;
use storefront_catalog::application::command_handlers::product_handlers;
use storefront_catalog::application::projector::ProductProjector;
use storefront_core::clock::{Clock, SystemClock};
use storefront_event_store::batcher::{BatcherHandle, TransactionBatcher};
use storefront_event_store::database::connect;
use storefront_event_store::unit_of_work::UnitOfWork;
use storefront_scheduler::application::projector::ScheduleProjector;
use storefront_scheduler::poller::{PollerHandle, SchedulePoller};
use storefront_scheduler::registry::HandlerRegistry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::routes;
use crate::state::AppState;

/// Builds the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/schedules", routes::schedules::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A unit of work projecting into every read model.
#[must_use]
pub fn unit_of_work(pool: SqlitePool, batcher: TransactionBatcher) -> UnitOfWork {
    UnitOfWork::new(pool, batcher)
        .with_projector(ScheduleProjector::factory())
        .with_projector(ProductProjector::factory())
}

/// Every command the poller can execute.
#[must_use]
pub fn handler_registry(clock: &Arc<dyn Clock>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (command_type, handler) in product_handlers(clock) {
        registry.register(command_type, handler);
    }
    registry
}

/// Background tasks that outlive a single request.
#[derive(Debug)]
pub struct Background {
    poller: PollerHandle,
    batcher: BatcherHandle,
}

impl Background {
    /// Stops the poller, then drains and stops the batcher.
    pub async fn shutdown(self) {
        self.poller.shutdown().await;
        self.batcher.shutdown().await;
    }
}

/// Opens the database and starts the batcher and the poller.
///
/// # Errors
///
/// Returns `AppError::Database` if the database cannot be opened or its
/// schema applied.
pub async fn bootstrap(config: &AppConfig) -> Result<(AppState, Background), AppError> {
    let pool = connect(&config.database).await?;
    let batcher = TransactionBatcher::new(pool.clone(), config.batcher.clone());
    let batcher_handle = batcher.start();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let uow = unit_of_work(pool.clone(), batcher);
    let registry = handler_registry(&clock);
    tracing::info!(command_types = ?registry.command_types(), "scheduled command handlers registered");

    let poller = SchedulePoller::new(uow.clone(), registry, Arc::clone(&clock), config.poller);
    let poller_handle = poller.start();

    let state = AppState::new(pool, &uow, clock);
    Ok((
        state,
        Background {
            poller: poller_handle,
            batcher: batcher_handle,
        },
    ))
}
