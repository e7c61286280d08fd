//! Test command handlers that record or refuse every command they receive.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_core::command::{Command, CommandContext};
use storefront_core::error::DomainError;
use storefront_event_store::handler::CommandHandler;
use storefront_event_store::repository::Repositories;
use uuid::Uuid;

/// A free-form command for exercising handler plumbing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCommand {
    /// Correlation ID.
    pub correlation_id: Uuid,
    /// Issuing user.
    pub user_id: String,
    /// Arbitrary command body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Command for TestCommand {
    fn command_type(&self) -> &'static str {
        "test.command"
    }

    fn context(&self) -> CommandContext {
        CommandContext {
            correlation_id: self.correlation_id,
            user_id: self.user_id.clone(),
        }
    }
}

/// A handler that records every command it handles and writes nothing.
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingCommandHandler {
    handled: Arc<Mutex<Vec<TestCommand>>>,
}

impl RecordingCommandHandler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every command handled so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn handled(&self) -> Vec<TestCommand> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandHandler for RecordingCommandHandler {
    type Command = TestCommand;

    async fn handle(&self, _repos: &Repositories, command: TestCommand) -> Result<(), DomainError> {
        self.handled.lock().unwrap().push(command);
        Ok(())
    }
}

/// A handler that fails every command with a fixed error.
#[derive(Debug, Clone)]
pub struct FailingCommandHandler {
    error: DomainError,
    attempts: Arc<Mutex<usize>>,
}

impl FailingCommandHandler {
    /// Creates a handler failing with `error`.
    #[must_use]
    pub fn new(error: DomainError) -> Self {
        Self {
            error,
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of commands received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl CommandHandler for FailingCommandHandler {
    type Command = TestCommand;

    async fn handle(&self, _repos: &Repositories, _command: TestCommand) -> Result<(), DomainError> {
        *self.attempts.lock().unwrap() += 1;
        Err(self.error.clone())
    }
}
