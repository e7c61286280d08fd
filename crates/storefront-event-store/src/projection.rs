//! Read-model projection.
//!
//! Projectors are built per unit of work from factories so they can queue
//! their read-model writes into the same batch as the events they project.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;

use crate::repository::Repositories;

/// Maps domain events to read-model writes.
#[async_trait]
pub trait Projector: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Projects one event. Events the projector does not handle are ignored.
    ///
    /// # Errors
    ///
    /// Any error aborts the unit of work that produced the event.
    async fn execute(&self, event: &StoredEvent) -> Result<(), DomainError>;
}

/// Builds the projectors of one unit of work, bound to its repositories.
pub type ProjectorFactory = Arc<dyn Fn(&Repositories) -> Vec<Box<dyn Projector>> + Send + Sync>;

/// Fans each event out to every registered projector.
pub struct ProjectorDispatcher {
    projectors: Vec<Box<dyn Projector>>,
}

impl std::fmt::Debug for ProjectorDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.projectors.iter().map(|p| p.name()).collect();
        f.debug_struct("ProjectorDispatcher")
            .field("projectors", &names)
            .finish()
    }
}

impl ProjectorDispatcher {
    /// Creates a dispatcher over `projectors`.
    #[must_use]
    pub fn new(projectors: Vec<Box<dyn Projector>>) -> Self {
        Self { projectors }
    }

    /// Instantiates every factory against `repos`.
    #[must_use]
    pub fn from_factories(factories: &[ProjectorFactory], repos: &Repositories) -> Self {
        Self::new(factories.iter().flat_map(|factory| factory(repos)).collect())
    }

    /// Number of projectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    /// Returns `true` when no projector is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }

    /// Runs every projector for `event` and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns the first projector error.
    pub async fn dispatch(&self, event: &StoredEvent) -> Result<(), DomainError> {
        try_join_all(self.projectors.iter().map(|projector| async move {
            projector.execute(event).await.map_err(|e| {
                tracing::warn!(
                    projector = projector.name(),
                    event = %event.event_name,
                    aggregate_id = %event.aggregate_id,
                    version = event.version,
                    error = %e,
                    "projector failed"
                );
                e
            })
        }))
        .await?;
        Ok(())
    }

    /// Dispatches `events` one after another, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first projector error.
    pub async fn dispatch_all(&self, events: &[StoredEvent]) -> Result<(), DomainError> {
        for event in events {
            self.dispatch(event).await?;
        }
        Ok(())
    }
}
