//! Chronologically ordered, mutex-guarded memory registry.
//!
//! The registry maps record ids to records and keeps them ordered
//! ascending by `metadata.created_at`, ties broken by insertion order.
//! Every operation takes the single internal lock for its full duration;
//! iteration holds it for the whole traversal.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SubstrateError};
use crate::record::{Kind, Record};

#[derive(Default)]
struct RegistryInner {
    records: HashMap<Uuid, Record>,
    /// Record ids ascending by created_at, ties in insertion order
    order: Vec<Uuid>,
}

impl RegistryInner {
    /// Stable re-sort by created_at; equal timestamps keep their
    /// current relative order.
    fn reorder(&mut self) {
        let records = &self.records;
        self.order
            .sort_by_key(|id| records.get(id).map(|r| r.metadata.created_at));
    }
}

/// Thread-safe, chronologically ordered registry of records.
pub struct MemoryRegistry {
    inner: Mutex<RegistryInner>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A poisoned lock means a panic mid-mutation; the stored data is
        // still structurally valid, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new record.
    ///
    /// Fails with [`SubstrateError::DuplicateId`] if the id exists.
    pub fn insert(&self, record: Record) -> Result<()> {
        let mut inner = self.lock();
        if inner.records.contains_key(&record.id) {
            return Err(SubstrateError::DuplicateId { id: record.id });
        }
        debug!(record_id = %record.id, kind = record.kind.as_str(), "inserting record");
        inner.order.push(record.id);
        inner.records.insert(record.id, record);
        inner.reorder();
        Ok(())
    }

    /// Replace an existing record.
    ///
    /// Fails with [`SubstrateError::NotFound`] if absent. The registry is
    /// re-sorted only when `created_at` changed.
    pub fn update(&self, record: Record) -> Result<()> {
        let mut inner = self.lock();
        let old_created_at = match inner.records.get(&record.id) {
            Some(existing) => existing.metadata.created_at,
            None => return Err(SubstrateError::NotFound { id: record.id }),
        };
        let changed = record.metadata.created_at != old_created_at;
        inner.records.insert(record.id, record);
        if changed {
            inner.reorder();
        }
        Ok(())
    }

    /// Retrieve a record by id.
    pub fn get(&self, id: Uuid) -> Result<Record> {
        let inner = self.lock();
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(SubstrateError::NotFound { id })
    }

    /// Remove a record by id.
    pub fn remove(&self, id: Uuid) -> Result<Record> {
        let mut inner = self.lock();
        let record = inner
            .records
            .remove(&id)
            .ok_or(SubstrateError::NotFound { id })?;
        inner.order.retain(|other| *other != id);
        Ok(record)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Iterate records in chronological order, bounded by
    /// `start <= created_at < end`.
    ///
    /// The returned iterator holds the registry lock for its whole
    /// lifetime; restart by calling `iterate` again.
    pub fn iterate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ChronologicalIter<'_> {
        ChronologicalIter {
            guard: self.lock(),
            position: 0,
            start,
            end,
        }
    }

    /// Query records by conjunctive optional filters, in registry order.
    pub fn query(&self, query: &MemoryQuery) -> Vec<Record> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }

    /// Follow the provenance chain backward from `id` via the last listed
    /// ancestor, returning the chain oldest-first and ending at `id`.
    ///
    /// Missing ancestor ids are skipped without error; a visited set
    /// halts cycles, returning the partial chain.
    pub fn trace_provenance(&self, id: Uuid, max_depth: Option<usize>) -> Vec<Record> {
        let inner = self.lock();
        let mut chain = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut current = id;
        let mut depth = 0usize;
        loop {
            if !seen.insert(current) {
                break; // cycle
            }
            let record = match inner.records.get(&current) {
                Some(record) => record,
                None => break,
            };
            chain.insert(0, record.clone());
            let Some(next) = record.metadata.provenance.last().copied() else {
                break;
            };
            current = next;
            depth += 1;
            if max_depth.is_some_and(|max| depth >= max) {
                break;
            }
        }
        chain
    }

    /// Serialize the registry to a JSON array, preserving order.
    pub fn serialize(&self) -> Result<String> {
        let inner = self.lock();
        let records: Vec<&Record> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .collect();
        Ok(serde_json::to_string(&records)?)
    }

    /// Replace registry contents from a serialized payload, re-sorting
    /// afterward. Order and field values round-trip exactly.
    pub fn deserialize(&self, data: &str) -> Result<()> {
        let records: Vec<Record> = serde_json::from_str(data)?;
        let mut inner = self.lock();
        inner.records.clear();
        inner.order.clear();
        for record in records {
            inner.order.push(record.id);
            inner.records.insert(record.id, record);
        }
        inner.reorder();
        Ok(())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-holding chronological iterator over registry records.
pub struct ChronologicalIter<'a> {
    guard: MutexGuard<'a, RegistryInner>,
    position: usize,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl Iterator for ChronologicalIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.guard.order.len() {
            let id = self.guard.order[self.position];
            self.position += 1;
            let Some(record) = self.guard.records.get(&id) else {
                continue;
            };
            let created = record.metadata.created_at;
            if self.start.is_some_and(|start| created < start) {
                continue;
            }
            if self.end.is_some_and(|end| created >= end) {
                continue;
            }
            return Some(record.clone());
        }
        None
    }
}

/// Conjunctive filter set for [`MemoryRegistry::query`].
///
/// Every filter is independently optional; unset filters match all.
#[derive(Default)]
pub struct MemoryQuery {
    kind: Option<Kind>,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
    min_confidence: Option<f64>,
    predicate: Option<Box<dyn Fn(&Record) -> bool + Send + Sync>>,
}

impl MemoryQuery {
    /// Empty query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match only records of this kind.
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Match records with `created_at >= after`.
    pub fn after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    /// Match records with `created_at < before`.
    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Match records with at least this confidence.
    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    /// Match records passing an arbitrary predicate.
    pub fn predicate(mut self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn matches(&self, record: &Record) -> bool {
        if let Some(kind) = &self.kind {
            if record.kind != *kind {
                return false;
            }
        }
        if self.after.is_some_and(|t| record.metadata.created_at < t) {
            return false;
        }
        if self.before.is_some_and(|t| record.metadata.created_at >= t) {
            return false;
        }
        if self
            .min_confidence
            .is_some_and(|min| record.metadata.confidence < min)
        {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(record) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    fn record_at(hour: u32) -> Record {
        Record::new(Kind::Memory).with_created_at(at_hour(hour))
    }

    #[test]
    fn test_insert_orders_chronologically() {
        let registry = MemoryRegistry::new();
        let r10 = record_at(10);
        let r9 = record_at(9);
        let r11 = record_at(11);
        registry.insert(r10.clone()).unwrap();
        registry.insert(r9.clone()).unwrap();
        registry.insert(r11.clone()).unwrap();

        let ids: Vec<Uuid> = registry.iterate(None, None).map(|r| r.id).collect();
        assert_eq!(ids, vec![r9.id, r10.id, r11.id]);
    }

    #[test]
    fn test_update_repositions_on_timestamp_change() {
        let registry = MemoryRegistry::new();
        let r10 = record_at(10);
        let r9 = record_at(9);
        let r11 = record_at(11);
        registry.insert(r10.clone()).unwrap();
        registry.insert(r9.clone()).unwrap();
        registry.insert(r11.clone()).unwrap();

        let moved = r10.clone().with_created_at(at_hour(12));
        registry.update(moved).unwrap();

        let ids: Vec<Uuid> = registry.iterate(None, None).map(|r| r.id).collect();
        assert_eq!(ids, vec![r9.id, r11.id, r10.id]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let registry = MemoryRegistry::new();
        let first = record_at(9);
        let second = record_at(9);
        registry.insert(first.clone()).unwrap();
        registry.insert(second.clone()).unwrap();

        let ids: Vec<Uuid> = registry.iterate(None, None).map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = MemoryRegistry::new();
        let record = record_at(9);
        registry.insert(record.clone()).unwrap();

        let differing_payload = record.clone().with_field("note", "changed");
        assert!(matches!(
            registry.insert(differing_payload),
            Err(SubstrateError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_get_remove_not_found() {
        let registry = MemoryRegistry::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            registry.get(missing),
            Err(SubstrateError::NotFound { .. })
        ));
        assert!(matches!(
            registry.remove(missing),
            Err(SubstrateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_iterate_bounds() {
        let registry = MemoryRegistry::new();
        for hour in 8..12 {
            registry.insert(record_at(hour)).unwrap();
        }
        let windowed: Vec<Record> = registry
            .iterate(Some(at_hour(9)), Some(at_hour(11)))
            .collect();
        assert_eq!(windowed.len(), 2);
        assert_eq!(windowed[0].metadata.created_at, at_hour(9));
        assert_eq!(windowed[1].metadata.created_at, at_hour(10));
    }

    #[test]
    fn test_query_filters_are_conjunctive() {
        let registry = MemoryRegistry::new();
        registry
            .insert(record_at(9).with_confidence(0.9).with_field("tag", "a"))
            .unwrap();
        registry
            .insert(record_at(10).with_confidence(0.2).with_field("tag", "a"))
            .unwrap();
        registry
            .insert(
                Record::new(Kind::Perception)
                    .with_created_at(at_hour(11))
                    .with_confidence(0.9),
            )
            .unwrap();

        let results = registry.query(
            &MemoryQuery::new()
                .kind(Kind::Memory)
                .min_confidence(0.5)
                .predicate(|r| r.field_str("tag") == Some("a")),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.created_at, at_hour(9));
    }

    #[test]
    fn test_trace_provenance_skips_missing_and_halts_cycles() {
        let registry = MemoryRegistry::new();
        let a = record_at(8);
        let b = record_at(9).with_provenance([a.id]);
        let c = record_at(10).with_provenance([Uuid::new_v4(), b.id]);
        registry.insert(a.clone()).unwrap();
        registry.insert(b.clone()).unwrap();
        registry.insert(c.clone()).unwrap();

        let chain = registry.trace_provenance(c.id, None);
        let ids: Vec<Uuid> = chain.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);

        // Cycle: a -> c closes the loop
        let mut a_cyclic = a.clone();
        a_cyclic.metadata.provenance = vec![c.id];
        registry.update(a_cyclic).unwrap();

        let chain = registry.trace_provenance(c.id, None);
        assert_eq!(chain.len(), 3);
        let unique: HashSet<Uuid> = chain.iter().map(|r| r.id).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_trace_provenance_max_depth() {
        let registry = MemoryRegistry::new();
        let a = record_at(8);
        let b = record_at(9).with_provenance([a.id]);
        let c = record_at(10).with_provenance([b.id]);
        registry.insert(a).unwrap();
        registry.insert(b.clone()).unwrap();
        registry.insert(c.clone()).unwrap();

        let chain = registry.trace_provenance(c.id, Some(1));
        let ids: Vec<Uuid> = chain.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let registry = MemoryRegistry::new();
        registry
            .insert(record_at(10).with_field("note", "first"))
            .unwrap();
        registry.insert(record_at(9).with_confidence(0.4)).unwrap();
        registry.insert(record_at(11)).unwrap();

        let payload = registry.serialize().unwrap();
        let original: Vec<Record> = registry.iterate(None, None).collect();

        let restored = MemoryRegistry::new();
        restored.deserialize(&payload).unwrap();
        let roundtripped: Vec<Record> = restored.iterate(None, None).collect();

        assert_eq!(roundtripped, original);
    }

    #[test]
    fn test_deserialize_rejects_malformed_payload() {
        let registry = MemoryRegistry::new();
        registry.insert(record_at(9)).unwrap();

        assert!(matches!(
            registry.deserialize("not json"),
            Err(SubstrateError::Serde(_))
        ));
        // A rejected payload leaves the registry untouched
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_deserialize_replaces_existing_contents() {
        let registry = MemoryRegistry::new();
        registry.insert(record_at(9)).unwrap();
        let payload = registry.serialize().unwrap();

        registry.insert(record_at(10)).unwrap();
        registry.deserialize(&payload).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
