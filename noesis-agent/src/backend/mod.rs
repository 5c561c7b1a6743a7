//! Generation backend abstraction layer.
//!
//! Provides a trait-based interface over text-generation services:
//! - OpenAI-compatible chat completions (OpenAI, vLLM, Ollama, gateways)
//! - Mock backend for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use traits::{GenerationBackend, LlmError};
