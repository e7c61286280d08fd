//! Unit of work: one command, one batch, one outcome.
//!
//! `with_transaction` gives the caller a fresh set of batch-bound
//! repositories, projects whatever events the caller produced into the same
//! batch, hands the batch to the batcher, and returns only once the batcher
//! has committed or rejected it. Either everything the command wrote is
//! persisted or nothing is.

use std::future::Future;
use std::sync::Arc;

use sqlx::SqlitePool;
use storefront_core::error::DomainError;

use crate::batch::TransactionBatch;
use crate::batcher::TransactionBatcher;
use crate::projection::{ProjectorDispatcher, ProjectorFactory};
use crate::repository::Repositories;

/// Runs commands against batch-bound repositories.
#[derive(Clone)]
pub struct UnitOfWork {
    pool: SqlitePool,
    batcher: TransactionBatcher,
    projectors: Arc<Vec<ProjectorFactory>>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("batcher", &self.batcher)
            .field("projector_factories", &self.projectors.len())
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Creates a unit of work with no projectors.
    #[must_use]
    pub fn new(pool: SqlitePool, batcher: TransactionBatcher) -> Self {
        Self {
            pool,
            batcher,
            projectors: Arc::new(Vec::new()),
        }
    }

    /// Adds a projector factory; its projectors see every event produced
    /// inside `with_transaction`.
    #[must_use]
    pub fn with_projector(mut self, factory: ProjectorFactory) -> Self {
        Arc::make_mut(&mut self.projectors).push(factory);
        self
    }

    /// The read pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The batcher batches are handed to.
    #[must_use]
    pub fn batcher(&self) -> &TransactionBatcher {
        &self.batcher
    }

    /// Runs `work` inside a new batch and waits for the batch to settle.
    ///
    /// # Errors
    ///
    /// Returns the error from `work` or a projector (nothing is persisted),
    /// `DomainError::Backpressure` when the batcher queue is full, or the
    /// error the batch was rejected with.
    pub async fn with_transaction<F, Fut, T>(&self, work: F) -> Result<T, DomainError>
    where
        F: FnOnce(Repositories) -> Fut + Send,
        Fut: Future<Output = Result<T, DomainError>> + Send,
        T: Send,
    {
        let (mut batch, outcome) = TransactionBatch::new();
        let batch_id = batch.id();
        let repos = Repositories::new(self.pool.clone(), batch.writer());

        let value = match work(repos.clone()).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(%batch_id, error = %e, "unit of work aborted");
                batch.reject(e.clone());
                return Err(e);
            }
        };

        let events = repos.events.new_events();
        let dispatcher = ProjectorDispatcher::from_factories(&self.projectors, &repos);
        if let Err(e) = dispatcher.dispatch_all(&events).await {
            tracing::warn!(%batch_id, error = %e, "projection failed, discarding unit of work");
            batch.reject(e.clone());
            return Err(e);
        }

        if batch.is_empty() {
            batch.resolve();
            return Ok(value);
        }

        let commands = batch.len();
        self.batcher.enqueue(batch)?;
        match outcome.wait().await {
            Ok(()) => {
                tracing::debug!(%batch_id, events = events.len(), commands, "unit of work committed");
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(%batch_id, error = %e, "unit of work rejected");
                Err(e)
            }
        }
    }
}
