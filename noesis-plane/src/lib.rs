//! Noesis Plane - Orchestration Layer
//!
//! Binds the substrate stores and the dispatch layer into running
//! cognitive planes:
//!
//! - [`plane::MentalPlane`]: dual-write orchestrator with consolidation,
//!   pruning, contradiction handling and adaptive recall
//! - [`feedback::SalienceFeedback`]: qualia-driven salience updates
//! - [`runtime::PlaneRuntime`]: the cooperative event loop and its
//!   [`runtime::PlaneHandle`]
//! - [`archetype::ArchetypeBroadcaster`]: shared template records with
//!   push subscription
//! - [`config::PlaneConfig`]: YAML-loadable configuration
//!
//! Planes own their stores outright; everything crossing a plane
//! boundary travels as an intent or an archetype.

pub mod archetype;
pub mod config;
pub mod feedback;
pub mod plane;
pub mod runtime;
pub mod surface;

pub use archetype::{ArchetypeBroadcaster, ArchetypeCallback, ArchetypeFilter, ArchetypeQuery, SubscriptionId};
pub use config::{ArchivalMode, ConsolidationConfig, PlaneConfig, PruningConfig, RuntimeConfig, SalienceConfig};
pub use feedback::SalienceFeedback;
pub use plane::{AttentionBias, DefaultGrouping, GroupingStrategy, MentalPlane, RecallOptions};
pub use runtime::{PlaneHandle, PlaneMessage, PlaneRuntime, RuntimeError};
pub use surface::{DispatchSurface, IntentSurface};
