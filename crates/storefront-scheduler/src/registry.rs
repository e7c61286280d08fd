//! Command handler registry keyed by command type.

use std::collections::HashMap;
use std::sync::Arc;

use storefront_event_store::handler::{CommandHandler, JsonCommandHandler};

/// Maps a schedule's `command_type` to the handler that executes it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JsonCommandHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("command_types", &self.command_types())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type-erased handler. A later registration for the same
    /// command type replaces the earlier one.
    pub fn register(&mut self, command_type: impl Into<String>, handler: Arc<dyn JsonCommandHandler>) {
        let command_type = command_type.into();
        if self.handlers.insert(command_type.clone(), handler).is_some() {
            tracing::warn!(%command_type, "replacing registered command handler");
        }
    }

    /// Registers a typed handler.
    pub fn register_handler<H>(&mut self, command_type: impl Into<String>, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.register(command_type, Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, command_type: impl Into<String>, handler: Arc<dyn JsonCommandHandler>) -> Self {
        self.register(command_type, handler);
        self
    }

    /// The handler for `command_type`, if any.
    #[must_use]
    pub fn get(&self, command_type: &str) -> Option<Arc<dyn JsonCommandHandler>> {
        self.handlers.get(command_type).cloned()
    }

    /// Returns `true` if a handler is registered for `command_type`.
    #[must_use]
    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// Number of registered command types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered command types, sorted.
    #[must_use]
    pub fn command_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
