//! Test projectors that record or refuse every event they see.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;
use storefront_event_store::projection::{Projector, ProjectorFactory};
use storefront_event_store::repository::Repositories;

/// A projector that records every event it executes. Clones share the same
/// record.
#[derive(Debug, Clone, Default)]
pub struct RecordingProjector {
    seen: Arc<Mutex<Vec<StoredEvent>>>,
}

impl RecordingProjector {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory producing projectors that share this recorder.
    #[must_use]
    pub fn factory(&self) -> ProjectorFactory {
        let recorder = self.clone();
        Arc::new(move |_repos: &Repositories| vec![Box::new(recorder.clone()) as Box<dyn Projector>])
    }

    /// Returns every event seen so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<StoredEvent> {
        self.seen.lock().unwrap().clone()
    }

    /// Returns the names of every event seen so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_name.clone())
            .collect()
    }
}

#[async_trait]
impl Projector for RecordingProjector {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn execute(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A projector that fails on every event with an infrastructure error.
#[derive(Debug, Clone)]
pub struct FailingProjector {
    message: String,
}

impl FailingProjector {
    /// Creates a projector failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// A factory producing this projector.
    #[must_use]
    pub fn factory(&self) -> ProjectorFactory {
        let projector = self.clone();
        Arc::new(move |_repos: &Repositories| vec![Box::new(projector.clone()) as Box<dyn Projector>])
    }
}

#[async_trait]
impl Projector for FailingProjector {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn execute(&self, _event: &StoredEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure(self.message.clone()))
    }
}
