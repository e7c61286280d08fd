//! Domain events for the Product Catalog context.

use storefront_core::error::DomainError;
use storefront_core::event::{DomainEvent, EventMetadata, StateChange};

use super::aggregates::ProductState;

/// Event type constant for product creation.
pub const PRODUCT_CREATED_EVENT_TYPE: &str = "product.created";
/// Event type constant for title/handle changes.
pub const PRODUCT_DETAILS_UPDATED_EVENT_TYPE: &str = "product.details_updated";
/// Event type constant for publication.
pub const PRODUCT_PUBLISHED_EVENT_TYPE: &str = "product.published";
/// Event type constant for archival.
pub const PRODUCT_ARCHIVED_EVENT_TYPE: &str = "product.archived";

/// The transitions a product can go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductEventKind {
    /// A draft product was created.
    Created,
    /// Title or handle changed.
    DetailsUpdated,
    /// The product became visible.
    Published,
    /// The product was retired.
    Archived,
}

impl ProductEventKind {
    /// The namespaced event name.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Created => PRODUCT_CREATED_EVENT_TYPE,
            Self::DetailsUpdated => PRODUCT_DETAILS_UPDATED_EVENT_TYPE,
            Self::Published => PRODUCT_PUBLISHED_EVENT_TYPE,
            Self::Archived => PRODUCT_ARCHIVED_EVENT_TYPE,
        }
    }

    /// Maps a stored event name back to its kind.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            PRODUCT_CREATED_EVENT_TYPE => Some(Self::Created),
            PRODUCT_DETAILS_UPDATED_EVENT_TYPE => Some(Self::DetailsUpdated),
            PRODUCT_PUBLISHED_EVENT_TYPE => Some(Self::Published),
            PRODUCT_ARCHIVED_EVENT_TYPE => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Domain event envelope for the Product Catalog context.
#[derive(Debug, Clone)]
pub struct ProductEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Which transition happened.
    pub kind: ProductEventKind,
    /// Product state before and after.
    pub change: StateChange<ProductState>,
}

impl DomainEvent for ProductEvent {
    fn event_name(&self) -> &'static str {
        self.kind.event_name()
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::to_value(&self.change)?)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
