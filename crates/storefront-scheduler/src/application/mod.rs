//! Application layer for the Scheduled Commands context.

pub mod command_handlers;
pub mod projector;
pub mod query_handlers;
