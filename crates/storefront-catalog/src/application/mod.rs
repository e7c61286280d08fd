//! Application layer for the Product Catalog context.

pub mod command_handlers;
pub mod projector;
pub mod query_handlers;
