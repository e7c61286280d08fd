//! Command and service abstractions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Who issued a command and which causal chain it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Correlation ID propagated to every event the command produces.
    pub correlation_id: Uuid,
    /// The user on whose behalf the command runs.
    pub user_id: String,
}

impl CommandContext {
    /// Creates a context with a fresh correlation ID.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            user_id: user_id.into(),
        }
    }
}

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID and user of this command.
    fn context(&self) -> CommandContext;
}

/// Access level a caller needs to run a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Anyone.
    Public,
    /// Any signed-in user.
    Authenticated,
    /// Operators only.
    Admin,
}

/// A unit of application behavior invoked by routers and the scheduler.
#[async_trait]
pub trait Service: Send + Sync {
    /// The command this service executes.
    type Command: Command;

    /// Access level required to execute the command.
    fn access_level(&self) -> AccessLevel;

    /// Executes the command to completion.
    ///
    /// # Errors
    ///
    /// Returns the `DomainError` that aborted the command; nothing is
    /// persisted in that case.
    async fn execute(&self, command: Self::Command) -> Result<(), DomainError>;
}
