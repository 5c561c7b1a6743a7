//! Configuration for plane orchestration.

use serde::{Deserialize, Serialize};

/// Configuration for a mental plane and its runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneConfig {
    /// Plane identifier
    pub plane_id: String,
    /// Salience feedback configuration
    pub salience: SalienceConfig,
    /// Memory consolidation configuration
    pub consolidation: ConsolidationConfig,
    /// Pruning configuration
    pub pruning: PruningConfig,
    /// Event loop configuration
    pub runtime: RuntimeConfig,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            plane_id: uuid::Uuid::new_v4().to_string(),
            salience: SalienceConfig::default(),
            consolidation: ConsolidationConfig::default(),
            pruning: PruningConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PlaneConfig {
    /// Create a new config with a plane identifier.
    pub fn new(plane_id: impl Into<String>) -> Self {
        Self {
            plane_id: plane_id.into(),
            ..Default::default()
        }
    }

    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Salience feedback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalienceConfig {
    /// Exponential decay factor applied to the previous salience
    pub decay: f64,
    /// Lower salience clamp
    pub min_salience: f64,
    /// Upper salience clamp
    pub max_salience: f64,
    /// Fallback intensity when a result carries no confidence
    pub default_intensity: f64,
    /// Maximum qualia events retained in the feedback log
    pub log_capacity: usize,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            decay: 0.99,
            min_salience: 0.0,
            max_salience: 10.0,
            default_intensity: 0.5,
            log_capacity: 10_000,
        }
    }
}

/// Memory consolidation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Consolidation window (seconds back from now)
    pub window_secs: u64,
    /// Minimum group size to abstract over
    pub min_group_size: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600, // 1 hour
            min_group_size: 3,
        }
    }
}

/// What pruning does with an eligible record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalMode {
    /// Flag the record as archived, keep it in both stores
    Soft,
    /// Delete the record outright where provenance permits
    Hard,
}

/// Pruning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Records below this salience are prune candidates
    pub min_salience: f64,
    /// Records older than this are expiry candidates (seconds)
    pub expiry_secs: u64,
    /// Soft-archive or hard-delete eligible records
    pub mode: ArchivalMode,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            min_salience: 0.1,
            expiry_secs: 30 * 24 * 3600, // 30 days
            mode: ArchivalMode::Soft,
        }
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Spawn a task per intent instead of awaiting inline
    pub concurrent_intents: bool,
    /// Maintenance cycle interval (seconds)
    pub cycle_interval_secs: u64,
    /// Bounded capacity of the inbound message channel
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrent_intents: false,
            cycle_interval_secs: 60,
            channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlaneConfig::default();
        assert_eq!(config.salience.decay, 0.99);
        assert_eq!(config.consolidation.min_group_size, 3);
        assert_eq!(config.pruning.mode, ArchivalMode::Soft);
        assert!(!config.runtime.concurrent_intents);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = PlaneConfig::new("test-plane");
        config.pruning.mode = ArchivalMode::Hard;
        let yaml = config.to_yaml().unwrap();
        let parsed = PlaneConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.plane_id, "test-plane");
        assert_eq!(parsed.pruning.mode, ArchivalMode::Hard);
    }
}
