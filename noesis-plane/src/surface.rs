//! Intent submission surface between a plane and the dispatch layer.
//!
//! Planes never call the transformation dispatcher directly; they hand
//! intents to an [`IntentSurface`] and receive exactly one terminal
//! outcome back. The production implementation wraps a
//! [`TransformationDispatcher`] and tracks terminal outcomes for
//! later polling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use noesis_agent::TransformationDispatcher;
use noesis_core::{Intent, Outcome};

/// Asynchronous boundary a plane submits intents across.
#[async_trait]
pub trait IntentSurface: Send + Sync {
    /// Execute an intent and return its terminal outcome.
    async fn submit_intent(&self, intent: &Intent) -> Outcome;

    /// Terminal outcome of a previously submitted intent, if any.
    async fn poll_result(&self, intent_id: Uuid) -> Option<Outcome>;
}

/// Production surface delegating to the transformation dispatcher.
pub struct DispatchSurface {
    dispatcher: Arc<TransformationDispatcher>,
    results: Mutex<HashMap<Uuid, Outcome>>,
}

impl DispatchSurface {
    /// Wrap a dispatcher into an intent surface.
    pub fn new(dispatcher: Arc<TransformationDispatcher>) -> Self {
        Self {
            dispatcher,
            results: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped dispatcher.
    pub fn dispatcher(&self) -> &Arc<TransformationDispatcher> {
        &self.dispatcher
    }
}

#[async_trait]
impl IntentSurface for DispatchSurface {
    async fn submit_intent(&self, intent: &Intent) -> Outcome {
        debug!(intent_id = %intent.id, version = intent.version, "submitting intent");
        let mut outcome = self.dispatcher.handle(&intent.transformation).await;
        // Dispatch reports against the transformation; outcomes surface
        // under the intent that submitted it.
        outcome.intent_id = intent.id;
        if outcome.is_terminal() {
            let mut results = self.results.lock().await;
            results.insert(intent.id, outcome.clone());
        }
        outcome
    }

    async fn poll_result(&self, intent_id: Uuid) -> Option<Outcome> {
        let results = self.results.lock().await;
        results.get(&intent_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noesis_agent::MockBackend;
    use noesis_core::{OutcomeStatus, Record};
    use serde_json::json;

    fn surface() -> DispatchSurface {
        DispatchSurface::new(Arc::new(TransformationDispatcher::with_backend(Arc::new(
            MockBackend::default(),
        ))))
    }

    #[tokio::test]
    async fn test_outcome_tracks_intent_id() {
        let surface = surface();
        surface
            .dispatcher()
            .register_fn("echo", |t: Record| {
                Box::pin(async move { Outcome::success(t.id, json!({})) })
            })
            .await;

        let intent = Intent::new(Record::transformation("echo"));
        let outcome = surface.submit_intent(&intent).await;
        assert_eq!(outcome.intent_id, intent.id);
        assert_eq!(outcome.status, OutcomeStatus::Success);
    }

    #[tokio::test]
    async fn test_poll_result_after_submission() {
        let surface = surface();
        let intent = Intent::new(Record::transformation("nothing_registered"));

        assert!(surface.poll_result(intent.id).await.is_none());
        let outcome = surface.submit_intent(&intent).await;
        assert_eq!(outcome.status, OutcomeStatus::Failure);

        let polled = surface.poll_result(intent.id).await.unwrap();
        assert_eq!(polled.id, outcome.id);
    }
}
