//! Storefront Product Catalog bounded context.
//!
//! Responsible for products, their merchandising details, and their
//! draft → published → archived lifecycle.

pub mod application;
pub mod domain;
