//! Mental plane: the orchestrator binding both stores together.
//!
//! A plane owns one memory registry and one self map, keeps them
//! consistent through dual writes with compensating rollback, and runs
//! the cognitive maintenance cycle: consolidation of repeated memories
//! into abstractions, salience-driven pruning, contradiction handling
//! and adaptive recall. Intents leave the plane through an
//! [`IntentSurface`](crate::surface::IntentSurface); outcomes come back
//! as qualia feeding the salience loop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use noesis_core::{
    Intent, Kind, MemoryQuery, MemoryRegistry, Outcome, OutcomeStatus, Record, Result, SelfMap,
    SubstrateError,
};

use crate::config::{ArchivalMode, PlaneConfig};
use crate::feedback::SalienceFeedback;
use crate::surface::IntentSurface;

/// Assigns consolidation group keys to memory records.
///
/// Records returning `None` are ungroupable and never consolidated.
pub trait GroupingStrategy: Send + Sync {
    fn group_key(&self, record: &Record) -> Option<String>;
}

/// Default strategy: group by (source, modality, event_type).
pub struct DefaultGrouping;

impl GroupingStrategy for DefaultGrouping {
    fn group_key(&self, record: &Record) -> Option<String> {
        let source = record.field_str("source")?;
        let modality = record.field_str("modality")?;
        let event_type = record.field_str("event_type")?;
        Some(format!("{source}|{modality}|{event_type}"))
    }
}

/// Options for [`MentalPlane::adaptive_recall`].
pub struct RecallOptions {
    top_n: usize,
    qualia_weight: f64,
    attention: Option<AttentionBias>,
    filter: Option<Box<dyn Fn(&Record) -> bool + Send + Sync>>,
}

/// Flat score bonus for records matching the current focus (a record id
/// or a modality name).
pub struct AttentionBias {
    pub focus: String,
    pub bonus: f64,
}

impl RecallOptions {
    /// Recall at most `top_n` records with default weighting.
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n,
            qualia_weight: 1.0,
            attention: None,
            filter: None,
        }
    }

    /// Weight applied to recent qualia feedback.
    pub fn qualia_weight(mut self, weight: f64) -> Self {
        self.qualia_weight = weight;
        self
    }

    /// Bias recall toward a focused id or modality.
    pub fn attention(mut self, focus: impl Into<String>, bonus: f64) -> Self {
        self.attention = Some(AttentionBias {
            focus: focus.into(),
            bonus,
        });
        self
    }

    /// Restrict candidates by an arbitrary predicate.
    pub fn filter(mut self, filter: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

/// Orchestrator over one memory registry / self map pair.
pub struct MentalPlane {
    id: String,
    memory: Arc<MemoryRegistry>,
    selfmap: Arc<SelfMap>,
    feedback: SalienceFeedback,
    surface: Arc<dyn IntentSurface>,
    config: PlaneConfig,
    grouping: Box<dyn GroupingStrategy>,
}

impl MentalPlane {
    /// Create a plane with fresh, private stores.
    ///
    /// Planes never share stores; cross-plane traffic goes through
    /// intents and archetypes only.
    pub fn new(surface: Arc<dyn IntentSurface>, config: PlaneConfig) -> Self {
        let memory = Arc::new(MemoryRegistry::new());
        let selfmap = Arc::new(SelfMap::new());
        let feedback = SalienceFeedback::new(
            Arc::clone(&memory),
            Arc::clone(&selfmap),
            config.salience.clone(),
        );
        Self {
            id: config.plane_id.clone(),
            memory,
            selfmap,
            feedback,
            surface,
            config,
            grouping: Box::new(DefaultGrouping),
        }
    }

    /// Replace the consolidation grouping strategy.
    pub fn with_grouping(mut self, grouping: impl GroupingStrategy + 'static) -> Self {
        self.grouping = Box::new(grouping);
        self
    }

    /// Plane identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The plane's memory registry.
    pub fn memory(&self) -> &Arc<MemoryRegistry> {
        &self.memory
    }

    /// The plane's self map.
    pub fn selfmap(&self) -> &Arc<SelfMap> {
        &self.selfmap
    }

    /// The plane's salience feedback manager.
    pub fn feedback(&self) -> &SalienceFeedback {
        &self.feedback
    }

    /// Ingest an event record into both stores.
    ///
    /// The memory registry is written first, then the self map. When the
    /// graph write fails the memory write is compensated (delete on
    /// insert, restore on update) and the call fails with
    /// [`SubstrateError::PartialWrite`] carrying both error messages.
    pub fn on_event(&self, record: Record) -> Result<()> {
        record.validate()?;
        let previous = self.memory.get(record.id).ok();
        match &previous {
            Some(_) => self.memory.update(record.clone())?,
            None => self.memory.insert(record.clone())?,
        }

        let graph_result = match record.kind {
            Kind::Connection => {
                // Replacing an existing edge removes it first and puts it
                // back if the replacement is rejected
                let prior_edge = previous
                    .as_ref()
                    .and_then(|_| self.selfmap.remove_connection(record.id).ok());
                match self.selfmap.add_connection(record.clone()) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        if let Some(prior) = prior_edge {
                            let _ = self.selfmap.add_connection(prior);
                        }
                        Err(e)
                    }
                }
            }
            _ if self.selfmap.contains_node(record.id) => self.selfmap.update_node(record.clone()),
            _ => self.selfmap.add_node(record.clone()),
        };

        if let Err(graph_err) = graph_result {
            let rollback_error = match previous {
                Some(old) => self.memory.update(old).err(),
                None => self.memory.remove(record.id).err(),
            }
            .map(|e| e.to_string());
            if let Some(rollback) = &rollback_error {
                error!(
                    plane = %self.id,
                    record_id = %record.id,
                    error = %rollback,
                    "compensating memory write failed"
                );
            }
            return Err(SubstrateError::PartialWrite {
                error: graph_err.to_string(),
                rollback_error,
            });
        }
        debug!(plane = %self.id, record_id = %record.id, kind = record.kind.as_str(), "event ingested");
        Ok(())
    }

    /// Wrap a transformation into a fresh intent and submit it.
    ///
    /// Total like dispatch itself: an invalid transformation becomes a
    /// failure outcome rather than an error.
    pub async fn submit_intent(&self, transformation: Record) -> Outcome {
        if let Err(e) = transformation.validate() {
            return Outcome::failure(transformation.id, format!("invalid transformation: {e}"));
        }
        let intent = Intent::new(transformation);
        info!(plane = %self.id, intent_id = %intent.id, "submitting intent");
        self.surface.submit_intent(&intent).await
    }

    /// Turn an outcome into a qualia event about a record and apply it.
    ///
    /// Success maps to valence +1, failure to -1, pending to 0; intensity
    /// comes from the outcome's `confidence` output field when present.
    pub fn record_qualia(&self, outcome: &Outcome, about: Uuid, modality: &str) -> Result<Record> {
        let valence = match outcome.status {
            OutcomeStatus::Success => 1.0,
            OutcomeStatus::Failure => -1.0,
            OutcomeStatus::Pending => 0.0,
        };
        let intensity = outcome
            .output
            .as_ref()
            .and_then(|v| v.get("confidence"))
            .and_then(Value::as_f64)
            .unwrap_or(self.config.salience.default_intensity);
        let qualia = Record::new(Kind::Qualia)
            .with_field("valence", valence)
            .with_field("intensity", intensity)
            .with_field("about", about.to_string())
            .with_field("modality", modality)
            .with_field("outcome_id", outcome.id.to_string())
            .with_provenance([about]);
        self.feedback.on_qualia(&qualia)?;
        self.memory.insert(qualia.clone())?;
        Ok(qualia)
    }

    /// Consolidate repeated memories in the recent window into
    /// abstractions.
    ///
    /// Unarchived memory records inside the window are grouped by the
    /// plane's [`GroupingStrategy`]; each group of at least
    /// `min_group_size` yields one abstraction record carrying the
    /// members as provenance. Members are archived and demoted to the
    /// salience floor, and a positive qualia reinforces each new
    /// abstraction.
    pub fn consolidate_memories(&self) -> Result<Vec<Record>> {
        let window_start =
            Utc::now() - Duration::seconds(self.config.consolidation.window_secs as i64);
        let candidates = self.memory.query(
            &MemoryQuery::new()
                .kind(Kind::Memory)
                .after(window_start)
                .predicate(|r| !r.flag("archived")),
        );

        let mut groups: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for record in candidates {
            if let Some(key) = self.grouping.group_key(&record) {
                groups.entry(key).or_default().push(record);
            }
        }

        let mut abstractions = Vec::new();
        for (key, members) in groups {
            if members.len() < self.config.consolidation.min_group_size {
                continue;
            }
            let exemplar = &members[0];
            let abstraction = Record::new(Kind::Abstraction)
                .with_field("source", exemplar.field_str("source").unwrap_or_default())
                .with_field("modality", exemplar.field_str("modality").unwrap_or_default())
                .with_field(
                    "event_type",
                    exemplar.field_str("event_type").unwrap_or_default(),
                )
                .with_field("member_count", members.len())
                .with_provenance(members.iter().map(|m| m.id));
            self.on_event(abstraction.clone())?;

            for mut member in members {
                member.content.insert("archived".into(), Value::from(true));
                member.content.insert(
                    "salience".into(),
                    Value::from(self.config.salience.min_salience),
                );
                member.metadata.updated_at = Utc::now();
                self.memory.update(member.clone())?;
                if self.selfmap.contains_node(member.id) {
                    self.selfmap.update_node(member)?;
                }
            }

            let reinforcement = Record::new(Kind::Qualia)
                .with_field("valence", 1.0)
                .with_field("intensity", self.config.salience.default_intensity)
                .with_field("about", abstraction.id.to_string())
                .with_field("modality", "consolidation")
                .with_provenance([abstraction.id]);
            self.feedback.on_qualia(&reinforcement)?;
            self.memory.insert(reinforcement)?;

            info!(plane = %self.id, group = %key, abstraction_id = %abstraction.id, "consolidated memory group");
            abstractions.push(abstraction);
        }
        Ok(abstractions)
    }

    /// Ids referenced by any record's provenance, in either store.
    fn referenced_ids(&self) -> HashSet<Uuid> {
        let mut referenced = HashSet::new();
        for record in self.memory.query(&MemoryQuery::new()) {
            referenced.extend(record.metadata.provenance.iter().copied());
        }
        for node in self.selfmap.all_nodes() {
            referenced.extend(node.metadata.provenance.iter().copied());
        }
        referenced
    }

    /// Prune memory records that are contradicted, below the salience
    /// threshold, or expired and unreferenced.
    ///
    /// Soft mode flags eligible records as archived in both stores. Hard
    /// mode deletes them, but only when no other record's provenance
    /// references them; referenced records fall back to the soft flag.
    /// Returns the ids acted on.
    pub fn prune_memories(&self) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let expiry_cutoff = now - Duration::seconds(self.config.pruning.expiry_secs as i64);
        let referenced = self.referenced_ids();
        let mode = self.config.pruning.mode;

        let candidates = self.memory.query(&MemoryQuery::new().kind(Kind::Memory));
        let mut pruned = Vec::new();
        for record in candidates {
            // Already-archived records are settled unless hard mode can
            // now delete them
            if record.flag("archived")
                && (mode == ArchivalMode::Soft || referenced.contains(&record.id))
            {
                continue;
            }
            let contradicted = record.flag("contradicted");
            let faded = record.salience() < self.config.pruning.min_salience;
            let expired =
                record.metadata.created_at < expiry_cutoff && !referenced.contains(&record.id);
            if !(contradicted || faded || expired) {
                continue;
            }

            if mode == ArchivalMode::Hard && !referenced.contains(&record.id) {
                self.memory.remove(record.id)?;
                if self.selfmap.contains_node(record.id) {
                    self.selfmap.remove_node(record.id)?;
                }
                debug!(plane = %self.id, record_id = %record.id, "hard-pruned record");
            } else {
                let mut archived = record.clone();
                archived.content.insert("archived".into(), Value::from(true));
                archived.metadata.updated_at = now;
                self.memory.update(archived.clone())?;
                if self.selfmap.contains_node(archived.id) {
                    self.selfmap.update_node(archived)?;
                }
                debug!(plane = %self.id, record_id = %record.id, "soft-archived record");
            }
            pruned.push(record.id);
        }
        if !pruned.is_empty() {
            info!(plane = %self.id, count = pruned.len(), "pruning pass complete");
        }
        Ok(pruned)
    }

    /// Belief pairs asserting different values for the same subject.
    ///
    /// Beliefs are gathered from both stores and compared pairwise on
    /// `content.subject` / `content.value`.
    pub fn detect_contradictions(&self) -> Vec<(Uuid, Uuid)> {
        let mut beliefs = self.memory.query(&MemoryQuery::new().kind(Kind::Belief));
        let known: HashSet<Uuid> = beliefs.iter().map(|b| b.id).collect();
        for node in self.selfmap.get_nodes_by_kind(&Kind::Belief) {
            if !known.contains(&node.id) {
                beliefs.push(node);
            }
        }

        let mut by_subject: HashMap<String, Vec<&Record>> = HashMap::new();
        for belief in &beliefs {
            if let Some(subject) = belief.field_str("subject") {
                by_subject.entry(subject.to_string()).or_default().push(belief);
            }
        }

        let mut pairs = Vec::new();
        for group in by_subject.values() {
            for (i, left) in group.iter().enumerate() {
                for right in &group[i + 1..] {
                    if left.content.get("value") != right.content.get("value") {
                        pairs.push((left.id, right.id));
                    }
                }
            }
        }
        pairs
    }

    /// Flag every detected contradiction in both stores.
    ///
    /// Each record in a contradicting pair gets `contradicted: true` and
    /// the other's id appended to its provenance, making the conflict
    /// traceable from either side. Returns the number of pairs handled.
    pub fn correct_contradictions(&self) -> Result<usize> {
        let pairs = self.detect_contradictions();
        for (left, right) in &pairs {
            self.flag_contradicted(*left, *right)?;
            self.flag_contradicted(*right, *left)?;
        }
        if !pairs.is_empty() {
            info!(plane = %self.id, pairs = pairs.len(), "flagged contradictions");
        }
        Ok(pairs.len())
    }

    fn flag_contradicted(&self, id: Uuid, other: Uuid) -> Result<()> {
        let apply = |mut record: Record| {
            record
                .content
                .insert("contradicted".into(), Value::from(true));
            if !record.metadata.provenance.contains(&other) {
                record.metadata.provenance.push(other);
            }
            record.metadata.updated_at = Utc::now();
            record
        };
        if let Ok(record) = self.memory.get(id) {
            self.memory.update(apply(record))?;
        }
        if let Ok(node) = self.selfmap.get_node(id) {
            self.selfmap.update_node(apply(node))?;
        }
        Ok(())
    }

    /// Recall the highest-scoring records across both stores.
    ///
    /// Score is salience plus weighted mean qualia feedback over the last
    /// 24 hours, plus a linear recency term decaying to zero at 24 hours,
    /// plus any attention bonus. Qualia records themselves are excluded;
    /// ties keep store order.
    pub fn adaptive_recall(&self, options: &RecallOptions) -> Vec<Record> {
        let now = Utc::now();
        let day_ago = now - Duration::hours(24);

        let mut candidates = self.memory.query(&MemoryQuery::new());
        let known: HashSet<Uuid> = candidates.iter().map(|r| r.id).collect();
        for node in self.selfmap.all_nodes() {
            if !known.contains(&node.id) {
                candidates.push(node);
            }
        }
        candidates.retain(|r| r.kind != Kind::Qualia);
        if let Some(filter) = &options.filter {
            candidates.retain(|r| filter(r));
        }

        let mut scored: Vec<(f64, Record)> = candidates
            .into_iter()
            .map(|record| {
                let qualia = self
                    .feedback
                    .feedback_score(record.id, day_ago)
                    .unwrap_or(0.0);
                let age_secs = (now - record.metadata.created_at).num_seconds().max(0) as f64;
                let recency = (1.0 - age_secs / 86_400.0).max(0.0);
                let attention = options.attention.as_ref().map_or(0.0, |bias| {
                    let focused = bias.focus == record.id.to_string()
                        || record.field_str("modality") == Some(bias.focus.as_str());
                    if focused {
                        bias.bonus
                    } else {
                        0.0
                    }
                });
                let score = record.salience() + options.qualia_weight * qualia + recency + attention;
                (score, record)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(options.top_n)
            .map(|(_, record)| record)
            .collect()
    }
}
