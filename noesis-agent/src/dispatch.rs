//! Transformation dispatch registry.
//!
//! Maps operation names to asynchronous handlers. Dispatch is total:
//! `handle` always returns an [`Outcome`], never an error - unknown
//! operations, malformed parameters and generation-service failures all
//! become failure outcomes so automation built on top can treat every
//! intent as yielding exactly one terminal result.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use noesis_core::{Outcome, Record};

use crate::backend::{GenerationBackend, LlmError, OpenAiBackend};

/// Asynchronous handler for a registered operation.
#[async_trait]
pub trait TransformationHandler: Send + Sync {
    /// Execute the transformation and report its outcome.
    async fn handle(&self, transformation: &Record) -> Outcome;
}

/// Adapter turning an async closure into a [`TransformationHandler`].
pub struct FnHandler<F>(pub F)
where
    F: Fn(Record) -> BoxFuture<'static, Outcome> + Send + Sync;

#[async_trait]
impl<F> TransformationHandler for FnHandler<F>
where
    F: Fn(Record) -> BoxFuture<'static, Outcome> + Send + Sync,
{
    async fn handle(&self, transformation: &Record) -> Outcome {
        (self.0)(transformation.clone()).await
    }
}

/// Registry mapping operation names to async handlers, with a built-in
/// default handler delegating generation-service transformations.
pub struct TransformationDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn TransformationHandler>>>,
    backend: Arc<dyn GenerationBackend>,
}

impl TransformationDispatcher {
    /// Create a dispatcher backed by the environment-configured
    /// OpenAI-compatible generation service.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(OpenAiBackend::from_env()))
    }

    /// Create a dispatcher with an explicit generation backend.
    pub fn with_backend(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            backend,
        }
    }

    /// Register a handler for an operation name, replacing any previous
    /// handler for that operation.
    pub async fn register(&self, operation: impl Into<String>, handler: Arc<dyn TransformationHandler>) {
        let operation = operation.into();
        debug!(operation = %operation, "registering transformation handler");
        let mut handlers = self.handlers.write().await;
        handlers.insert(operation, handler);
    }

    /// Register an async closure as a handler.
    pub async fn register_fn<F>(&self, operation: impl Into<String>, f: F)
    where
        F: Fn(Record) -> BoxFuture<'static, Outcome> + Send + Sync + 'static,
    {
        self.register(operation, Arc::new(FnHandler(f))).await;
    }

    /// Remove a handler; unknown operations are a no-op.
    pub async fn unregister(&self, operation: &str) {
        let mut handlers = self.handlers.write().await;
        handlers.remove(operation);
    }

    /// Registered operation names.
    pub async fn operations(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        handlers.keys().cloned().collect()
    }

    /// Dispatch a transformation record to its handler.
    ///
    /// Transformations carrying `llm_params` route to the generation
    /// backend; otherwise `content.operation` selects a registered
    /// handler. Every failure mode produces a failure outcome.
    pub async fn handle(&self, transformation: &Record) -> Outcome {
        if let Some(parsed) = transformation.llm_params() {
            return match parsed {
                Ok(params) => self.handle_generation(transformation, &params).await,
                Err(e) => Outcome::failure(
                    transformation.id,
                    LlmError::InvalidParams(e.to_string()).to_string(),
                ),
            };
        }

        let Some(operation) = transformation.field_str("operation") else {
            return Outcome::failure(
                transformation.id,
                "transformation has no string 'operation' field and no llm_params",
            );
        };

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(operation).cloned()
        };
        match handler {
            Some(handler) => handler.handle(transformation).await,
            None => {
                warn!(operation = %operation, "no handler registered");
                Outcome::failure(
                    transformation.id,
                    format!("no handler registered for operation '{operation}'"),
                )
            }
        }
    }

    async fn handle_generation(
        &self,
        transformation: &Record,
        params: &noesis_core::LlmParams,
    ) -> Outcome {
        match self.backend.generate(params).await {
            Ok(reply) => Outcome::success(transformation.id, json!({ "llm_response": reply })),
            Err(e) => Outcome::failure(transformation.id, e.to_string()),
        }
    }
}

impl Default for TransformationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
