//! Domain layer for the Product Catalog context.

pub mod aggregates;
pub mod commands;
pub mod events;
