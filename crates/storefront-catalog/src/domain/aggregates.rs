//! Aggregate roots for the Product Catalog context.

use serde::{Deserialize, Serialize};
use storefront_core::aggregate::AggregateRoot;
use storefront_core::clock::Clock;
use storefront_core::command::CommandContext;
use storefront_core::error::DomainError;
use storefront_core::event::{EventMetadata, StateChange};
use uuid::Uuid;

use super::events::{ProductEvent, ProductEventKind};

/// Lifecycle of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    /// Not yet visible to shoppers.
    Draft,
    /// Visible to shoppers.
    Published,
    /// Retired; no further changes.
    Archived,
}

impl ProductStatus {
    /// Column value in the read model.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    /// Parses a read-model column value.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` for unknown values.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            other => Err(DomainError::Infrastructure(format!(
                "unknown product status: {other}"
            ))),
        }
    }
}

/// Serializable state of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductState {
    /// Product identifier.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// URL handle, lowercase letters, digits and dashes.
    pub handle: String,
    /// Lifecycle status.
    pub status: ProductStatus,
}

/// The aggregate root for a product.
#[derive(Debug)]
pub struct Product {
    state: ProductState,
    version: i64,
    uncommitted_events: Vec<ProductEvent>,
}

fn validate_details(title: &str, handle: &str) -> Result<(), DomainError> {
    if title.trim().is_empty() {
        return Err(DomainError::Validation("product title must not be empty".into()));
    }
    if handle.is_empty()
        || !handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(DomainError::Validation(format!(
            "product handle {handle:?} must be lowercase letters, digits and dashes"
        )));
    }
    Ok(())
}

impl Product {
    /// Creates a draft product, producing a `product.created` event at
    /// version 0.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the title is blank or the handle
    /// is malformed.
    pub fn create(
        id: Uuid,
        title: impl Into<String>,
        handle: impl Into<String>,
        context: &CommandContext,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let title = title.into();
        let handle = handle.into();
        validate_details(&title, &handle)?;

        let mut product = Self {
            state: ProductState {
                id,
                title,
                handle,
                status: ProductStatus::Draft,
            },
            version: 0,
            uncommitted_events: Vec::new(),
        };
        product.record(ProductEventKind::Created, None, context, clock);
        Ok(product)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &ProductState {
        &self.state
    }

    /// Changes title and handle.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if the product is archived,
    /// or `DomainError::Validation` for malformed details.
    pub fn update_details(
        &mut self,
        title: impl Into<String>,
        handle: impl Into<String>,
        context: &CommandContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.state.status == ProductStatus::Archived {
            return Err(DomainError::InvariantViolation(
                "cannot update an archived product".into(),
            ));
        }
        let title = title.into();
        let handle = handle.into();
        validate_details(&title, &handle)?;

        let next = ProductState {
            title,
            handle,
            ..self.state.clone()
        };
        self.transition(ProductEventKind::DetailsUpdated, next, context, clock);
        Ok(())
    }

    /// Publishes the product.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if the product is archived
    /// or already published.
    pub fn publish(&mut self, context: &CommandContext, clock: &dyn Clock) -> Result<(), DomainError> {
        match self.state.status {
            ProductStatus::Archived => Err(DomainError::InvariantViolation(
                "cannot publish an archived product".into(),
            )),
            ProductStatus::Published => Err(DomainError::InvariantViolation(
                "product is already published".into(),
            )),
            ProductStatus::Draft => {
                let next = ProductState {
                    status: ProductStatus::Published,
                    ..self.state.clone()
                };
                self.transition(ProductEventKind::Published, next, context, clock);
                Ok(())
            }
        }
    }

    /// Archives the product.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if it is already archived.
    pub fn archive(&mut self, context: &CommandContext, clock: &dyn Clock) -> Result<(), DomainError> {
        if self.state.status == ProductStatus::Archived {
            return Err(DomainError::InvariantViolation(
                "product is already archived".into(),
            ));
        }
        let next = ProductState {
            status: ProductStatus::Archived,
            ..self.state.clone()
        };
        self.transition(ProductEventKind::Archived, next, context, clock);
        Ok(())
    }

    fn transition(
        &mut self,
        kind: ProductEventKind,
        next: ProductState,
        context: &CommandContext,
        clock: &dyn Clock,
    ) {
        let prior = std::mem::replace(&mut self.state, next);
        self.version += 1;
        self.record(kind, Some(prior), context, clock);
    }

    fn record(
        &mut self,
        kind: ProductEventKind,
        prior_state: Option<ProductState>,
        context: &CommandContext,
        clock: &dyn Clock,
    ) {
        self.uncommitted_events.push(ProductEvent {
            metadata: EventMetadata {
                aggregate_id: self.state.id,
                version: self.version,
                correlation_id: context.correlation_id,
                user_id: context.user_id.clone(),
                occurred_at: clock.now(),
            },
            kind,
            change: StateChange {
                prior_state,
                new_state: self.state.clone(),
            },
        });
    }
}

impl AggregateRoot for Product {
    const AGGREGATE_TYPE: &'static str = "product";
    type Event = ProductEvent;
    type State = ProductState;

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
    use chrono::{TimeZone, Utc};
    use storefront_core::event::DomainEvent;
    use storefront_test_support::FixedClock;

    use super::*;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    fn context() -> CommandContext {
        CommandContext::new("merchant-1")
    }

    fn draft() -> Product {
        Product::create(Uuid::new_v4(), "Linen Shirt", "linen-shirt", &context(), &clock()).unwrap()
    }

    #[test]
    fn test_create_produces_created_event_at_version_zero() {
        // Arrange
        let id = Uuid::new_v4();
        let ctx = context();

        // Act
        let product = Product::create(id, "Linen Shirt", "linen-shirt", &ctx, &clock()).unwrap();

        // Assert
        assert_eq!(product.version(), 0);
        assert_eq!(product.state().status, ProductStatus::Draft);
        let events = product.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "product.created");
        assert_eq!(events[0].metadata().version, 0);
        assert_eq!(events[0].metadata().correlation_id, ctx.correlation_id);
        assert!(events[0].change.prior_state.is_none());
    }

    #[test]
    fn test_mutations_increment_version_once_each() {
        // Arrange
        let mut product = draft();
        let ctx = context();

        // Act
        product
            .update_details("Linen Shirt II", "linen-shirt-ii", &ctx, &clock())
            .unwrap();
        product.publish(&ctx, &clock()).unwrap();
        product.archive(&ctx, &clock()).unwrap();

        // Assert
        assert_eq!(product.version(), 3);
        let names: Vec<&str> = product
            .uncommitted_events()
            .iter()
            .map(DomainEvent::event_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "product.created",
                "product.details_updated",
                "product.published",
                "product.archived"
            ]
        );
        let published = &product.uncommitted_events()[2];
        assert_eq!(
            published.change.prior_state.as_ref().map(|s| s.status),
            Some(ProductStatus::Draft)
        );
        assert_eq!(published.change.new_state.status, ProductStatus::Published);
    }

    #[test]
    fn test_publish_twice_is_rejected_without_mutation() {
        // Arrange
        let mut product = draft();
        product.publish(&context(), &clock()).unwrap();

        // Act
        let result = product.publish(&context(), &clock());

        // Assert
        assert!(matches!(result, Err(DomainError::InvariantViolation(msg)) if msg == "product is already published"));
        assert_eq!(product.version(), 1);
        assert_eq!(product.uncommitted_events().len(), 2);
    }

    #[test]
    fn test_archived_product_cannot_be_published_or_updated() {
        let mut product = draft();
        product.archive(&context(), &clock()).unwrap();

        let publish = product.publish(&context(), &clock());
        let update = product.update_details("X", "x", &context(), &clock());
        let archive = product.archive(&context(), &clock());

        assert!(matches!(publish, Err(DomainError::InvariantViolation(_))));
        assert!(matches!(update, Err(DomainError::InvariantViolation(_))));
        assert!(matches!(archive, Err(DomainError::InvariantViolation(msg)) if msg == "product is already archived"));
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn test_malformed_handle_is_a_validation_error() {
        let result = Product::create(Uuid::new_v4(), "Shirt", "Linen Shirt", &context(), &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_snapshot_round_trip_restores_state_and_version() {
        // Arrange
        let mut product = draft();
        product.publish(&context(), &clock()).unwrap();
        let state = product.to_snapshot();

        // Act
        let restored = Product::from_state(state.clone(), product.version());

        // Assert
        assert_eq!(restored.state(), &state);
        assert_eq!(restored.version(), 1);
        assert!(restored.uncommitted_events().is_empty());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "published");
    }
}
