//! Storefront HTTP API server library.
//!
//! Exposes the wiring used by the binary so integration tests can build the
//! same router against an in-memory database.

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
