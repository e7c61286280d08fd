//! Command handlers that run inside a caller-supplied unit of work.
//!
//! A [`CommandHandler`] does the domain work against repositories it is
//! given, so the same handler serves both an HTTP request (wrapped in a
//! [`TransactionalService`]) and the schedule poller, which runs the handler
//! and the schedule's own transition in one batch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use storefront_core::command::{AccessLevel, Command, CommandContext, Service};
use storefront_core::error::DomainError;

use crate::repository::Repositories;
use crate::unit_of_work::UnitOfWork;

/// Executes one command type against batch-bound repositories.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The command this handler accepts.
    type Command: Command + DeserializeOwned + Send + 'static;

    /// Performs the command's domain work.
    ///
    /// # Errors
    ///
    /// Any error aborts the surrounding unit of work.
    async fn handle(&self, repos: &Repositories, command: Self::Command) -> Result<(), DomainError>;
}

/// Type-erased handler taking its command as JSON.
#[async_trait]
pub trait JsonCommandHandler: Send + Sync {
    /// Decodes `data` into the handler's command and handles it on behalf of
    /// `context`.
    ///
    /// The context's `correlation_id` and `user_id` replace any stored in
    /// `data`, so the command joins the causal chain of whoever runs it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `data` is not a JSON object or
    /// does not decode, otherwise whatever the handler returns.
    async fn handle_json(
        &self,
        repos: &Repositories,
        data: serde_json::Value,
        context: &CommandContext,
    ) -> Result<(), DomainError>;
}

#[async_trait]
impl<H: CommandHandler> JsonCommandHandler for H {
    async fn handle_json(
        &self,
        repos: &Repositories,
        data: serde_json::Value,
        context: &CommandContext,
    ) -> Result<(), DomainError> {
        let serde_json::Value::Object(mut fields) = data else {
            return Err(DomainError::Validation(
                "invalid command data: expected a JSON object".into(),
            ));
        };
        fields.insert(
            "correlation_id".into(),
            serde_json::Value::String(context.correlation_id.to_string()),
        );
        fields.insert(
            "user_id".into(),
            serde_json::Value::String(context.user_id.clone()),
        );
        let command: H::Command = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| DomainError::Validation(format!("invalid command data: {e}")))?;
        self.handle(repos, command).await
    }
}

/// Runs a [`CommandHandler`] in its own unit of work.
pub struct TransactionalService<H> {
    uow: UnitOfWork,
    handler: Arc<H>,
    access_level: AccessLevel,
}

impl<H> std::fmt::Debug for TransactionalService<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalService")
            .field("handler", &std::any::type_name::<H>())
            .field("access_level", &self.access_level)
            .finish_non_exhaustive()
    }
}

impl<H> Clone for TransactionalService<H> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            handler: Arc::clone(&self.handler),
            access_level: self.access_level,
        }
    }
}

impl<H: CommandHandler> TransactionalService<H> {
    /// Wraps `handler`, requiring `access_level` of callers.
    #[must_use]
    pub fn new(uow: UnitOfWork, handler: H, access_level: AccessLevel) -> Self {
        Self {
            uow,
            handler: Arc::new(handler),
            access_level,
        }
    }

    /// The wrapped handler.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: CommandHandler + 'static> Service for TransactionalService<H> {
    type Command = H::Command;

    fn access_level(&self) -> AccessLevel {
        self.access_level
    }

    async fn execute(&self, command: Self::Command) -> Result<(), DomainError> {
        let command_type = command.command_type();
        let context = command.context();
        let handler = &self.handler;

        let result = self
            .uow
            .with_transaction(|repos| async move { handler.handle(&repos, command).await })
            .await;

        match &result {
            Ok(()) => tracing::info!(
                command_type,
                correlation_id = %context.correlation_id,
                user_id = %context.user_id,
                "command executed"
            ),
            Err(e) => tracing::warn!(
                command_type,
                correlation_id = %context.correlation_id,
                error = %e,
                "command failed"
            ),
        }
        result
    }
}
