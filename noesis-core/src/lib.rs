//! Noesis Core - Record Model, Memory Registry and Self-Graph
//!
//! The synchronous half of the Noesis cognitive substrate:
//!
//! - **Record model**: one universal tagged entity shape ([`Record`])
//!   with lineage metadata, distinguished by a [`Kind`] tag rather than
//!   a type hierarchy
//! - **Memory registry**: thread-safe, chronologically ordered store
//!   with lineage tracing and an order-preserving serial format
//! - **Self map**: thread-safe, versioned graph of records and typed
//!   connections with traversal and lineage walks
//!
//! Both stores follow one locking discipline: a single exclusive lock
//! per store, held for the full duration of every call, with no
//! suspension while held. Independently constructed orchestrators never
//! share a store pair.

pub mod error;
pub mod memory;
pub mod record;
pub mod selfmap;

pub use error::{Result, SubstrateError};
pub use memory::{MemoryQuery, MemoryRegistry};
pub use record::{Intent, Kind, LlmParams, Metadata, Outcome, OutcomeStatus, Record};
pub use selfmap::{SelfMap, SelfMapSnapshot};
