//! Mock generation backend for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};

use noesis_core::LlmParams;

use super::traits::{GenerationBackend, LlmError};

/// Mock backend with a canned reply or a canned failure.
pub struct MockBackend {
    model_id: String,
    reply: Value,
    fail_with: Option<String>,
    call_count: AtomicU32,
}

impl MockBackend {
    /// Create a mock answering with a minimal chat-completions reply.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            reply: json!({"choices": [{"message": {"content": "mock reply"}}]}),
            fail_with: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Set the canned reply.
    pub fn with_reply(mut self, reply: Value) -> Self {
        self.reply = reply;
        self
    }

    /// Make every call fail with a transport error.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Number of times generate was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, _params: &LlmParams) -> Result<Value, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => Err(LlmError::NetworkError(message.clone())),
            None => Ok(self.reply.clone()),
        }
    }
}
