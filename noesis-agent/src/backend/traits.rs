//! Core trait for generation-service backends.
//!
//! This module defines the `GenerationBackend` trait - the abstraction
//! over chat-completion-style text generation services that the default
//! transformation handler delegates to.

use async_trait::async_trait;
use serde_json::Value;

use noesis_core::LlmParams;

/// Error types for generation-service calls.
///
/// Each failure class carries a distinct message so the dispatch layer
/// can surface it verbatim in a failure outcome.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No API credential was configured or found in the environment
    #[error("missing generation-service credentials: {0}")]
    MissingCredentials(String),

    /// Generation parameters could not be parsed or are malformed
    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),

    /// The service answered with a non-success status
    #[error("generation request failed: {0}")]
    RequestFailed(String),

    /// The request never completed at the transport layer
    #[error("generation transport error: {0}")]
    NetworkError(String),

    /// The reply body could not be decoded
    #[error("generation reply parse error: {0}")]
    ParseError(String),
}

/// Backend for the external text-generation service.
///
/// Implementations must impose their own bounded transport timeout so a
/// stuck call cannot wedge the cooperative scheduler.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend identifier (e.g. endpoint or default model name).
    fn id(&self) -> &str;

    /// Send the generation parameters and return the raw JSON reply.
    async fn generate(&self, params: &LlmParams) -> Result<Value, LlmError>;
}
