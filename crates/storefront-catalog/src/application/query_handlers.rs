//! Query handlers for the Product Catalog context.
//!
//! Queries read `products_read_model`, never the event log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use storefront_core::error::DomainError;
use storefront_event_store::codec::{db_error, timestamp_from_millis, uuid_from_text};
use uuid::Uuid;

use crate::domain::aggregates::ProductStatus;

/// Read-only view of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    /// The product identifier.
    pub product_id: Uuid,
    /// Display title.
    pub title: String,
    /// URL handle.
    pub handle: String,
    /// Lifecycle status.
    pub status: ProductStatus,
    /// Version of the last projected event.
    pub version: i64,
    /// When the product last changed.
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    aggregate_id: String,
    title: String,
    handle: String,
    status: String,
    version: i64,
    updated_at: i64,
}

impl TryFrom<ProductRow> for ProductView {
    type Error = DomainError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: uuid_from_text(&row.aggregate_id)?,
            title: row.title,
            handle: row.handle,
            status: ProductStatus::parse(&row.status)?,
            version: row.version,
            updated_at: timestamp_from_millis(row.updated_at)?,
        })
    }
}

/// Retrieves a product by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the product has not been
/// projected, or `DomainError::Infrastructure` if the read fails.
pub async fn get_product_by_id(pool: &SqlitePool, product_id: Uuid) -> Result<ProductView, DomainError> {
    let row: Option<ProductRow> = sqlx::query_as(
        "SELECT aggregate_id, title, handle, status, version, updated_at \
         FROM products_read_model WHERE aggregate_id = ?",
    )
    .bind(product_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(db_error)?;

    row.map(ProductView::try_from)
        .transpose()?
        .ok_or(DomainError::AggregateNotFound(product_id))
}
