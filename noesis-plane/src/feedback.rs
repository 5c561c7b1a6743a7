//! Salience feedback: qualia-driven weight updates over both stores.
//!
//! Every qualia event nudges the salience of the record it is about,
//! in the memory registry and the self map alike, via an exponential
//! moving average. A bounded log of recent qualia backs retrospective
//! scoring for adaptive recall.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use noesis_core::{MemoryQuery, MemoryRegistry, Record, Result, SelfMap, SubstrateError};

use crate::config::SalienceConfig;

/// Custom salience update rule: (old, valence, intensity) -> new.
pub type SalienceRule = dyn Fn(f64, f64, f64) -> f64 + Send + Sync;

/// Applies qualia feedback to record salience in both stores.
pub struct SalienceFeedback {
    memory: Arc<MemoryRegistry>,
    selfmap: Arc<SelfMap>,
    config: SalienceConfig,
    rule: Option<Box<SalienceRule>>,
    qualia_log: Mutex<VecDeque<Record>>,
}

impl SalienceFeedback {
    /// Create a feedback manager over a memory/self-map pair.
    pub fn new(memory: Arc<MemoryRegistry>, selfmap: Arc<SelfMap>, config: SalienceConfig) -> Self {
        Self {
            memory,
            selfmap,
            config,
            rule: None,
            qualia_log: Mutex::new(VecDeque::new()),
        }
    }

    /// Replace the default exponential-moving-average rule.
    pub fn with_rule(mut self, rule: impl Fn(f64, f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        self.rule = Some(Box::new(rule));
        self
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<Record>> {
        self.qualia_log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_salience(&self, old: f64, valence: f64, intensity: f64) -> f64 {
        let raw = match &self.rule {
            Some(rule) => rule(old, valence, intensity),
            None => old * self.config.decay + valence * intensity,
        };
        raw.clamp(self.config.min_salience, self.config.max_salience)
    }

    /// Apply one qualia event: log it and update the salience of the
    /// record it is about in both stores.
    ///
    /// A target missing from either store is tolerated; the update is
    /// applied wherever the record exists.
    pub fn on_qualia(&self, qualia: &Record) -> Result<()> {
        qualia.validate()?;
        let about = qualia
            .field_str("about")
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                SubstrateError::Validation("qualia 'about' is not a valid uuid".into())
            })?;
        let valence = qualia.field_f64("valence").unwrap_or(0.0);
        let intensity = qualia
            .field_f64("intensity")
            .unwrap_or(self.config.default_intensity);

        {
            let mut log = self.log();
            log.push_back(qualia.clone());
            while log.len() > self.config.log_capacity {
                log.pop_front();
            }
        }

        let mut touched = false;
        if let Ok(mut record) = self.memory.get(about) {
            let updated = self.next_salience(record.salience(), valence, intensity);
            record.content.insert("salience".into(), Value::from(updated));
            record.metadata.updated_at = Utc::now();
            self.memory.update(record)?;
            touched = true;
        }
        if let Ok(mut node) = self.selfmap.get_node(about) {
            let updated = self.next_salience(node.salience(), valence, intensity);
            node.content.insert("salience".into(), Value::from(updated));
            node.metadata.updated_at = Utc::now();
            self.selfmap.update_node(node)?;
            touched = true;
        }
        if touched {
            debug!(about = %about, valence, intensity, "applied salience feedback");
        } else {
            warn!(about = %about, "qualia target absent from both stores");
        }
        Ok(())
    }

    /// Most recent qualia events, newest first.
    pub fn recent_qualia(&self, limit: usize) -> Vec<Record> {
        self.log().iter().rev().take(limit).cloned().collect()
    }

    /// Logged qualia about one record, newest first.
    pub fn qualia_for(&self, about: Uuid) -> Vec<Record> {
        let about_str = about.to_string();
        self.log()
            .iter()
            .rev()
            .filter(|q| q.field_str("about") == Some(about_str.as_str()))
            .cloned()
            .collect()
    }

    /// Mean valence*intensity of logged qualia about a record since a
    /// cutoff. `None` when no qualia in the window mention it.
    pub fn feedback_score(&self, about: Uuid, since: DateTime<Utc>) -> Option<f64> {
        let about_str = about.to_string();
        let log = self.log();
        let scores: Vec<f64> = log
            .iter()
            .filter(|q| {
                q.metadata.created_at >= since && q.field_str("about") == Some(about_str.as_str())
            })
            .map(|q| {
                q.field_f64("valence").unwrap_or(0.0)
                    * q.field_f64("intensity").unwrap_or(self.config.default_intensity)
            })
            .collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// The `top_n` highest-salience memory records, descending.
    pub fn salient_memories(&self, top_n: usize) -> Vec<Record> {
        let mut records = self.memory.query(&MemoryQuery::new());
        records.sort_by(|a, b| {
            b.salience()
                .partial_cmp(&a.salience())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        records.truncate(top_n);
        records
    }

    /// The `top_n` highest-salience self-map nodes, descending.
    pub fn salient_nodes(&self, top_n: usize) -> Vec<Record> {
        let mut nodes = self.selfmap.all_nodes();
        nodes.sort_by(|a, b| {
            b.salience()
                .partial_cmp(&a.salience())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        nodes.truncate(top_n);
        nodes
    }
}
