/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Fluent engine construction.

use crate::application::{Application, NoOpApplication};
use crate::session::SessionEngine;
use fixline_core::error::FixError;
use fixline_session::{SessionConfig, SessionEvent, SessionState};
use fixline_store::MessageStore;
use std::sync::Arc;

type Listener = Box<dyn Fn(SessionState, SessionState, SessionEvent) + Send + Sync>;

/// Builder for a [`SessionEngine`].
///
/// The store backend is normally opened from the configuration; tests and
/// embedders can inject one with
/// [`with_store`](EngineBuilder::with_store).
pub struct EngineBuilder {
    config: SessionConfig,
    application: Arc<dyn Application>,
    store: Option<Arc<dyn MessageStore>>,
    listeners: Vec<Listener>,
}

impl EngineBuilder {
    /// Creates a builder for the given session configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            application: Arc::new(NoOpApplication),
            store: None,
            listeners: Vec::new(),
        }
    }

    /// Sets the application callback handler.
    #[must_use]
    pub fn with_application(mut self, application: Arc<dyn Application>) -> Self {
        self.application = application;
        self
    }

    /// Injects a message store instead of opening one from configuration.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Adds a state-change listener.
    #[must_use]
    pub fn on_state_change(
        mut self,
        listener: impl Fn(SessionState, SessionState, SessionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    /// Returns `StoreError` if the configured backend cannot be opened.
    pub async fn build(self) -> Result<SessionEngine, FixError> {
        let mut engine = match self.store {
            Some(store) => SessionEngine::with_store(self.config, self.application, store).await,
            None => SessionEngine::new(self.config, self.application).await?,
        };
        for listener in self.listeners {
            engine.subscribe_state(listener);
        }
        Ok(engine)
    }
}
