//! Commands for the Product Catalog context.
//!
//! Commands deserialize from JSON so they can be stored as scheduled
//! command data. Whoever executes stored data supplies `correlation_id` and
//! `user_id`; every mutating command carries the version its issuer saw.

use serde::{Deserialize, Serialize};
use storefront_core::command::{Command, CommandContext};
use uuid::Uuid;

/// Command to create a draft product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProduct {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The issuing user.
    pub user_id: String,
    /// The product identifier.
    pub product_id: Uuid,
    /// Display title.
    pub title: String,
    /// URL handle.
    pub handle: String,
}

/// Command to change a product's title and handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProductDetails {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The issuing user.
    pub user_id: String,
    /// The product identifier.
    pub product_id: Uuid,
    /// Product version the issuer last saw.
    pub expected_version: i64,
    /// New display title.
    pub title: String,
    /// New URL handle.
    pub handle: String,
}

/// Command to publish a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishProduct {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The issuing user.
    pub user_id: String,
    /// The product identifier.
    pub product_id: Uuid,
    /// Product version the issuer last saw.
    pub expected_version: i64,
}

/// Command to archive a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveProduct {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The issuing user.
    pub user_id: String,
    /// The product identifier.
    pub product_id: Uuid,
    /// Product version the issuer last saw.
    pub expected_version: i64,
}

macro_rules! impl_command {
    ($($command:ty => $name:literal),+ $(,)?) => {
        $(
            impl Command for $command {
                fn command_type(&self) -> &'static str {
                    $name
                }

                fn context(&self) -> CommandContext {
                    CommandContext {
                        correlation_id: self.correlation_id,
                        user_id: self.user_id.clone(),
                    }
                }
            }
        )+
    };
}

impl_command! {
    CreateProduct => "product.create",
    UpdateProductDetails => "product.update_details",
    PublishProduct => "product.publish",
    ArchiveProduct => "product.archive",
}
