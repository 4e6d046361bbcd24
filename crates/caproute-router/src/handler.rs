//! In-process dispatch over a table of capability handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use caproute_protocol::Envelope;
use caproute_registry::NodeDescriptor;

use crate::dispatch::{DispatchError, Dispatcher};

/// Handler registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("intent must not be empty")]
    EmptyIntent,

    #[error("handler already registered for intent: {0}")]
    DuplicateIntent(String),
}

/// A capability implementation bound to one intent.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(&self, message: Envelope) -> Result<Envelope, DispatchError>;
}

/// Adapter turning a plain closure into a [`CapabilityHandler`].
pub struct FnHandler {
    func: Box<dyn Fn(Envelope) -> Result<Envelope, DispatchError> + Send + Sync>,
}

impl FnHandler {
    pub fn new(
        func: impl Fn(Envelope) -> Result<Envelope, DispatchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl CapabilityHandler for FnHandler {
    async fn handle(&self, message: Envelope) -> Result<Envelope, DispatchError> {
        (self.func)(message)
    }
}

/// Dispatcher backed by an intent-to-handler table.
///
/// Registration is validated up front: empty and duplicate intents are
/// rejected, so a routing decision can never land on an ambiguous handler.
#[derive(Default)]
pub struct HandlerDispatcher {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl HandlerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        intent: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), HandlerError> {
        let intent = intent.into();
        if intent.trim().is_empty() {
            return Err(HandlerError::EmptyIntent);
        }
        if self.handlers.contains_key(&intent) {
            return Err(HandlerError::DuplicateIntent(intent));
        }
        self.handlers.insert(intent, handler);
        Ok(())
    }

    pub fn register_fn(
        &mut self,
        intent: impl Into<String>,
        func: impl Fn(Envelope) -> Result<Envelope, DispatchError> + Send + Sync + 'static,
    ) -> Result<(), HandlerError> {
        self.register(intent, Arc::new(FnHandler::new(func)))
    }

    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDispatcher")
            .field("intents", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for HandlerDispatcher {
    async fn send(
        &self,
        node: &NodeDescriptor,
        message: Envelope,
    ) -> Result<Envelope, DispatchError> {
        let handler = self.handlers.get(&message.intent).ok_or_else(|| {
            DispatchError::Unavailable(format!(
                "node {} has no handler for intent {}",
                node.node_id, message.intent
            ))
        })?;
        debug!(node_id = %node.node_id, intent = %message.intent, "dispatching in-process");
        handler.handle(message).await
    }
}
