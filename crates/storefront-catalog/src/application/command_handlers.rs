//! Command handlers for the Product Catalog context.
//!
//! Each handler loads the product from its snapshot, runs the domain
//! method, and stages the resulting events, outbox entries, and snapshot in
//! the caller's unit of work. Nothing is persisted until that unit of work
//! commits.

use std::sync::Arc;

use async_trait::async_trait;
use storefront_core::clock::Clock;
use storefront_core::command::Command;
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;
use storefront_event_store::handler::{CommandHandler, JsonCommandHandler};
use storefront_event_store::repository::Repositories;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::domain::commands::{ArchiveProduct, CreateProduct, PublishProduct, UpdateProductDetails};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct ProductCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// The events staged for persistence.
    pub stored_events: Vec<StoredEvent>,
}

/// Handles the `CreateProduct` command.
///
/// # Errors
///
/// Returns `DomainError::InvariantViolation` if the product already exists,
/// `DomainError::Validation` for malformed details, or an infrastructure
/// error from the snapshot read.
pub async fn handle_create_product(
    command: &CreateProduct,
    clock: &dyn Clock,
    repos: &Repositories,
) -> Result<ProductCommandResult, DomainError> {
    if repos
        .find_aggregate::<Product>(command.product_id)
        .await?
        .is_some()
    {
        return Err(DomainError::InvariantViolation(format!(
            "product {} already exists",
            command.product_id
        )));
    }
    let mut product = Product::create(
        command.product_id,
        command.title.clone(),
        command.handle.clone(),
        &command.context(),
        clock,
    )?;

    let stored_events = repos.save_aggregate(&mut product)?;
    Ok(ProductCommandResult {
        aggregate_id: command.product_id,
        stored_events,
    })
}

/// Handles the `UpdateProductDetails` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the product does not exist,
/// `DomainError::ConcurrencyConflict` if it moved past `expected_version`,
/// or the domain error from the update.
pub async fn handle_update_product_details(
    command: &UpdateProductDetails,
    clock: &dyn Clock,
    repos: &Repositories,
) -> Result<ProductCommandResult, DomainError> {
    let mut product: Product = repos
        .load_aggregate_at(command.product_id, command.expected_version)
        .await?;

    product.update_details(
        command.title.clone(),
        command.handle.clone(),
        &command.context(),
        clock,
    )?;

    let stored_events = repos.save_aggregate(&mut product)?;
    Ok(ProductCommandResult {
        aggregate_id: command.product_id,
        stored_events,
    })
}

/// Handles the `PublishProduct` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the product does not exist,
/// `DomainError::ConcurrencyConflict` on a stale `expected_version`, or
/// `DomainError::InvariantViolation` if it cannot be published.
pub async fn handle_publish_product(
    command: &PublishProduct,
    clock: &dyn Clock,
    repos: &Repositories,
) -> Result<ProductCommandResult, DomainError> {
    let mut product: Product = repos
        .load_aggregate_at(command.product_id, command.expected_version)
        .await?;

    product.publish(&command.context(), clock)?;

    let stored_events = repos.save_aggregate(&mut product)?;
    Ok(ProductCommandResult {
        aggregate_id: command.product_id,
        stored_events,
    })
}

/// Handles the `ArchiveProduct` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the product does not exist,
/// `DomainError::ConcurrencyConflict` on a stale `expected_version`, or
/// `DomainError::InvariantViolation` if it is already archived.
pub async fn handle_archive_product(
    command: &ArchiveProduct,
    clock: &dyn Clock,
    repos: &Repositories,
) -> Result<ProductCommandResult, DomainError> {
    let mut product: Product = repos
        .load_aggregate_at(command.product_id, command.expected_version)
        .await?;

    product.archive(&command.context(), clock)?;

    let stored_events = repos.save_aggregate(&mut product)?;
    Ok(ProductCommandResult {
        aggregate_id: command.product_id,
        stored_events,
    })
}

macro_rules! command_handler {
    ($(#[$doc:meta])* $handler:ident, $command:ty, $handle:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $handler {
            clock: Arc<dyn Clock>,
        }

        impl $handler {
            /// Creates the handler.
            #[must_use]
            pub fn new(clock: Arc<dyn Clock>) -> Self {
                Self { clock }
            }
        }

        impl std::fmt::Debug for $handler {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($handler)).finish_non_exhaustive()
            }
        }

        #[async_trait]
        impl CommandHandler for $handler {
            type Command = $command;

            async fn handle(&self, repos: &Repositories, command: $command) -> Result<(), DomainError> {
                $handle(&command, self.clock.as_ref(), repos).await.map(|_| ())
            }
        }
    };
}

command_handler!(
    /// Creates draft products.
    CreateProductHandler,
    CreateProduct,
    handle_create_product
);
command_handler!(
    /// Changes product titles and handles.
    UpdateProductDetailsHandler,
    UpdateProductDetails,
    handle_update_product_details
);
command_handler!(
    /// Publishes products.
    PublishProductHandler,
    PublishProduct,
    handle_publish_product
);
command_handler!(
    /// Archives products.
    ArchiveProductHandler,
    ArchiveProduct,
    handle_archive_product
);

/// Every product handler keyed by its command type, for registration with
/// the schedule poller.
#[must_use]
pub fn product_handlers(clock: &Arc<dyn Clock>) -> Vec<(&'static str, Arc<dyn JsonCommandHandler>)> {
    let create: Arc<dyn JsonCommandHandler> = Arc::new(CreateProductHandler::new(Arc::clone(clock)));
    let update: Arc<dyn JsonCommandHandler> =
        Arc::new(UpdateProductDetailsHandler::new(Arc::clone(clock)));
    let publish: Arc<dyn JsonCommandHandler> = Arc::new(PublishProductHandler::new(Arc::clone(clock)));
    let archive: Arc<dyn JsonCommandHandler> = Arc::new(ArchiveProductHandler::new(Arc::clone(clock)));
    vec![
        ("product.create", create),
        ("product.update_details", update),
        ("product.publish", publish),
        ("product.archive", archive),
    ]
}
