//! OpenAI-compatible generation backend.
//!
//! Works with any chat-completions endpoint speaking the OpenAI wire
//! format (OpenAI API, vLLM, Ollama, LocalAI, gateways in front of them).
//! The raw JSON reply is returned untouched; interpretation is left to
//! the dispatch layer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::{json, Value};
use tracing::debug;

use noesis_core::LlmParams;

use super::traits::{GenerationBackend, LlmError};

/// Environment variables consulted for the bearer credential, in order.
const CREDENTIAL_ENV_VARS: [&str; 2] = ["NOESIS_API_KEY", "OPENAI_API_KEY"];

/// Default transport timeout; a stuck call must not wedge the scheduler.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// OpenAI-compatible backend with bearer-token auth.
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    /// Create a backend against a base URL with an explicit credential.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_timeout(base_url, api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create with a custom transport timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Create a backend for the OpenAI API, taking the credential from
    /// the environment (`NOESIS_API_KEY`, then `OPENAI_API_KEY`).
    pub fn from_env() -> Self {
        let api_key = CREDENTIAL_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok());
        Self::new("https://api.openai.com/v1", api_key)
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the chat-completions payload, merging extra parameters that
    /// do not collide with the required keys.
    fn build_payload(params: &LlmParams) -> Value {
        let mut payload = json!({
            "model": params.model,
            "messages": [
                {"role": "system", "content": params.system_prompt.clone().unwrap_or_default()},
                {"role": "user", "content": params.user_prompt},
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        let map = payload.as_object_mut().expect("payload is an object");
        if let Some(top_p) = params.top_p {
            map.insert("top_p".into(), Value::from(top_p));
        }
        if let Some(stop) = &params.stop {
            map.insert("stop".into(), Value::from(stop.clone()));
        }
        for (key, value) in &params.extra_params {
            if !map.contains_key(key) {
                map.insert(key.clone(), value.clone());
            }
        }
        payload
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, params: &LlmParams) -> Result<Value, LlmError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            LlmError::MissingCredentials(format!(
                "set one of {}",
                CREDENTIAL_ENV_VARS.join(", ")
            ))
        })?;

        debug!(model = %params.model, "sending generation request");

        let response = self
            .client
            .post(self.chat_completions_url())
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&Self::build_payload(params))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_payload_merges_non_colliding_extras() {
        let mut params = LlmParams::new("gpt-4o-mini", "hello").with_system("be brief");
        params
            .extra_params
            .insert("seed".into(), Value::from(7));
        params
            .extra_params
            .insert("model".into(), Value::from("override-attempt"));

        let payload = OpenAiBackend::build_payload(&params);
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["seed"], 7);
        assert_eq!(payload["messages"][0]["content"], "be brief");
    }

    #[tokio::test]
    async fn test_generate_success_returns_raw_reply() {
        let server = MockServer::start().await;
        let reply = json!({"choices": [{"message": {"content": "hi"}}]});
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply.clone()))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(server.uri(), Some("sk-test".into()));
        let out = backend
            .generate(&LlmParams::new("gpt-4o-mini", "hello"))
            .await
            .unwrap();
        assert_eq!(out, reply);
    }

    #[tokio::test]
    async fn test_generate_non_2xx_is_request_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(server.uri(), Some("sk-test".into()));
        let err = backend
            .generate(&LlmParams::new("gpt-4o-mini", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_generate_without_credentials() {
        let backend = OpenAiBackend::new("http://localhost:1", None);
        let err = backend
            .generate(&LlmParams::new("gpt-4o-mini", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_generate_transport_error() {
        // Nothing listens on this port
        let backend = OpenAiBackend::new("http://127.0.0.1:9", Some("sk-test".into()));
        let err = backend
            .generate(&LlmParams::new("gpt-4o-mini", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NetworkError(_)));
    }
}
