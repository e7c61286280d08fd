//! Storefront Scheduled Commands bounded context.
//!
//! Responsible for commands that must run at a future instant: recording
//! them as `Schedule` aggregates, polling for due schedules, and executing
//! each one atomically with its registered handler, with bounded retries.

pub mod application;
pub mod domain;
pub mod poller;
pub mod registry;
pub mod retry;
