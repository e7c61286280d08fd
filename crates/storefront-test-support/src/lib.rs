//! Shared test doubles and utilities for the Storefront backend.

mod clock;
mod handler;
mod projector;

pub use clock::{FixedClock, StepClock};
pub use handler::{FailingCommandHandler, RecordingCommandHandler, TestCommand};
pub use projector::{FailingProjector, RecordingProjector};
