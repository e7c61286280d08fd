//! Storefront Event Store: SQLite persistence for the event-sourcing core.
//!
//! Writes never touch the database directly. A [`unit_of_work::UnitOfWork`]
//! collects a command's events, outbox entries, snapshot, and read-model
//! updates into a [`batch::TransactionBatch`]; the
//! [`batcher::TransactionBatcher`] commits many such batches in a single
//! physical transaction and isolates the ones that fail.

pub mod batch;
pub mod batcher;
pub mod codec;
pub mod database;
pub mod handler;
pub mod projection;
pub mod repository;
pub mod schema;
pub mod unit_of_work;

#[cfg(test)]
mod testing;
