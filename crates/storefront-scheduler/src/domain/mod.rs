//! Domain layer for the Scheduled Commands context.

pub mod aggregates;
pub mod commands;
pub mod events;
