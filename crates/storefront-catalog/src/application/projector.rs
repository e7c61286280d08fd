//! Product read-model projector.

use std::sync::Arc;

use async_trait::async_trait;
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;
use storefront_event_store::batch::{BatchWriter, QueuedCommand, WriteKind};
use storefront_event_store::projection::{Projector, ProjectorFactory};
use storefront_event_store::repository::Repositories;

use crate::domain::aggregates::ProductState;
use crate::domain::events::ProductEventKind;

const UPSERT_PRODUCT: &str = r"
INSERT INTO products_read_model (aggregate_id, title, handle, status, version, correlation_id, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (aggregate_id) DO UPDATE SET
    title = excluded.title,
    handle = excluded.handle,
    status = excluded.status,
    version = excluded.version,
    correlation_id = excluded.correlation_id,
    updated_at = excluded.updated_at
";

/// Keeps `products_read_model` in step with product events.
#[derive(Debug, Clone)]
pub struct ProductProjector {
    writer: BatchWriter,
}

impl ProductProjector {
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
impl Projector for ProductProjector {
    fn name(&self) -> &'static str {
        "products"
    }

    async fn execute(&self, event: &StoredEvent) -> Result<(), DomainError> {
        let Some(kind) = ProductEventKind::from_event_name(&event.event_name) else {
            return Ok(());
        };
        let change = event.decode_payload::<ProductState>()?;
        let state = change.new_state;

        self.writer.push(QueuedCommand::new(
            UPSERT_PRODUCT,
            vec![
                state.id.into(),
                state.title.into(),
                state.handle.into(),
                state.status.as_str().into(),
                event.version.into(),
                event.correlation_id.into(),
                event.occurred_at.into(),
            ],
            WriteKind::ReadModel,
        ));
        tracing::trace!(?kind, product_id = %event.aggregate_id, version = event.version, "product projected");
        Ok(())
    }
}
