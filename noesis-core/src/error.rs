//! Error taxonomy for the substrate.

use uuid::Uuid;

/// Error types for substrate operations.
///
/// Handler failures are deliberately absent: transformation dispatch is
/// total and always yields an [`Outcome`](crate::record::Outcome), never
/// an error. Lineage walks tolerate missing ancestors silently by design.
#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    /// Operation referenced an id absent from a registry or graph
    #[error("record {id} not found")]
    NotFound { id: Uuid },

    /// Insert or publish on an id that already exists
    #[error("duplicate id {id}")]
    DuplicateId { id: Uuid },

    /// Malformed record fields, surfaced at construction time
    #[error("validation failed: {0}")]
    Validation(String),

    /// Registry payload could not be encoded or decoded
    #[error("serde failure: {0}")]
    Serde(#[from] serde_json::Error),

    /// The self-graph half of a dual write failed after the memory half
    /// succeeded; the memory write was rolled back
    #[error("partial write rolled back: {error}")]
    PartialWrite {
        error: String,
        /// Set when the compensating delete itself also failed
        rollback_error: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, SubstrateError>;
