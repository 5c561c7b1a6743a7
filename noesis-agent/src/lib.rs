//! Noesis Agent - Generation Backends and Transformation Dispatch
//!
//! The asynchronous dispatch surface of the Noesis substrate:
//!
//! - Trait-based generation backends ([`backend::GenerationBackend`]):
//!   OpenAI-compatible chat completions plus a mock for tests
//! - [`dispatch::TransformationDispatcher`]: operation-name routing of
//!   transformation records to async handlers, with a built-in default
//!   handler delegating to the generation service
//!
//! Dispatch is total by contract: every transformation yields an
//! [`Outcome`](noesis_core::Outcome), never a propagated error.

pub mod backend;
pub mod dispatch;

pub use backend::{GenerationBackend, LlmError, MockBackend, OpenAiBackend};
pub use dispatch::{FnHandler, TransformationDispatcher, TransformationHandler};
