//! Storefront Core: shared event-sourcing abstractions.
//!
//! This crate defines the aggregate, event, snapshot, and command
//! primitives every bounded context builds on. It contains no
//! infrastructure code and performs no I/O.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod snapshot;
