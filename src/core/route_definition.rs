use std::sync::Arc;

use crate::{config::Definition, ports::router::Middleware};

/// A [`Definition`] together with the runtime middleware wrapped around its handler.
///
/// Only header actions can be expressed in configuration; `GatewayService::reload`
/// turns them into middleware here, next to whatever the embedder attaches.
#[derive(Debug, Clone)]
pub struct RouterDefinition {
    pub definition: Arc<Definition>,
    pub middleware: Vec<Middleware>,
}

impl RouterDefinition {
    pub fn new(definition: Definition) -> Self {
        Self {
            definition: Arc::new(definition),
            middleware: Vec::new(),
        }
    }

    /// Append a middleware; it wraps inside every middleware added before it.
    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.middleware.push(middleware);
    }

    /// Builder-style variant of [`add_middleware`](Self::add_middleware).
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.add_middleware(middleware);
        self
    }
}

impl From<Definition> for RouterDefinition {
    fn from(definition: Definition) -> Self {
        Self::new(definition)
    }
}
