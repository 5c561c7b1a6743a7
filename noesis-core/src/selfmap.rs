//! Versioned, graph-structured self-representation.
//!
//! Nodes are [`Record`]s, edges are connection records stored separately
//! from the adjacency index. Every mutation appends an immutable snapshot
//! of the full graph state to an append-only version history, keyed by
//! sequential string index. The history is the authoritative undo/audit
//! trail for the self-model.
//!
//! Records and adjacency sets live behind per-entry `Arc`s, so a snapshot
//! copies pointer tables only: entries untouched by a mutation are shared
//! across every version that contains them.
//!
//! Locking follows the same discipline as the memory registry: one
//! exclusive lock held for the full duration of every call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SubstrateError};
use crate::record::{Kind, Record};

/// Immutable full-state snapshot of the graph at one version.
///
/// Held behind `Arc` in an append-only arena; the per-entry `Arc`s mean
/// consecutive snapshots structurally share every unchanged record and
/// edge set.
#[derive(Debug, Clone)]
pub struct SelfMapSnapshot {
    /// Nodes at this version
    pub nodes: HashMap<Uuid, Arc<Record>>,
    /// Connection records at this version
    pub connections: HashMap<Uuid, Arc<Record>>,
    /// Outgoing adjacency at this version
    pub adjacency: HashMap<Uuid, Arc<HashSet<Uuid>>>,
}

#[derive(Default)]
struct SelfMapInner {
    nodes: HashMap<Uuid, Arc<Record>>,
    connections: HashMap<Uuid, Arc<Record>>,
    adjacency: HashMap<Uuid, Arc<HashSet<Uuid>>>,
    history: Vec<Arc<SelfMapSnapshot>>,
}

impl SelfMapInner {
    fn snapshot(&mut self) {
        self.history.push(Arc::new(SelfMapSnapshot {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
            adjacency: self.adjacency.clone(),
        }));
    }
}

/// Thread-safe, versioned graph of records and typed connections.
pub struct SelfMap {
    inner: Mutex<SelfMapInner>,
}

impl SelfMap {
    /// Create an empty self map.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SelfMapInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SelfMapInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a node. Fails with [`SubstrateError::DuplicateId`] if present.
    pub fn add_node(&self, record: Record) -> Result<()> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(&record.id) {
            return Err(SubstrateError::DuplicateId { id: record.id });
        }
        debug!(node_id = %record.id, kind = record.kind.as_str(), "adding node");
        inner.adjacency.entry(record.id).or_default();
        inner.nodes.insert(record.id, Arc::new(record));
        inner.snapshot();
        Ok(())
    }

    /// Replace an existing node. Fails with [`SubstrateError::NotFound`].
    pub fn update_node(&self, record: Record) -> Result<()> {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(&record.id) {
            return Err(SubstrateError::NotFound { id: record.id });
        }
        inner.nodes.insert(record.id, Arc::new(record));
        inner.snapshot();
        Ok(())
    }

    /// Retrieve a node by id.
    pub fn get_node(&self, id: Uuid) -> Result<Record> {
        let inner = self.lock();
        inner
            .nodes
            .get(&id)
            .map(|node| node.as_ref().clone())
            .ok_or(SubstrateError::NotFound { id })
    }

    /// Whether a node is registered.
    pub fn contains_node(&self, id: Uuid) -> bool {
        self.lock().nodes.contains_key(&id)
    }

    /// Remove a node, every connection touching it, and its adjacency
    /// entries.
    pub fn remove_node(&self, id: Uuid) -> Result<Record> {
        let mut inner = self.lock();
        let record = inner
            .nodes
            .remove(&id)
            .ok_or(SubstrateError::NotFound { id })?;
        inner.adjacency.remove(&id);
        for targets in inner.adjacency.values_mut() {
            // Copy-on-write: only edge sets actually containing the node
            // are rewritten
            if targets.contains(&id) {
                Arc::make_mut(targets).remove(&id);
            }
        }
        inner
            .connections
            .retain(|_, conn| conn.source() != Some(id) && conn.target() != Some(id));
        inner.snapshot();
        Ok(record.as_ref().clone())
    }

    /// Add a directed connection between registered nodes.
    ///
    /// Fails with [`SubstrateError::DuplicateId`] on an existing
    /// connection id and [`SubstrateError::NotFound`] when either endpoint
    /// is not a registered node. No implicit reverse edge is created.
    pub fn add_connection(&self, conn: Record) -> Result<()> {
        conn.validate()?;
        let source = conn.source().ok_or_else(|| {
            SubstrateError::Validation("connection record missing 'source' field".into())
        })?;
        let target = conn.target().ok_or_else(|| {
            SubstrateError::Validation("connection record missing 'target' field".into())
        })?;

        let mut inner = self.lock();
        if inner.connections.contains_key(&conn.id) {
            return Err(SubstrateError::DuplicateId { id: conn.id });
        }
        if !inner.nodes.contains_key(&source) {
            return Err(SubstrateError::NotFound { id: source });
        }
        if !inner.nodes.contains_key(&target) {
            return Err(SubstrateError::NotFound { id: target });
        }
        Arc::make_mut(inner.adjacency.entry(source).or_default()).insert(target);
        inner.connections.insert(conn.id, Arc::new(conn));
        inner.snapshot();
        Ok(())
    }

    /// Remove a connection by id and prune its adjacency edge.
    pub fn remove_connection(&self, id: Uuid) -> Result<Record> {
        let mut inner = self.lock();
        let conn = inner
            .connections
            .remove(&id)
            .ok_or(SubstrateError::NotFound { id })?;
        if let (Some(source), Some(target)) = (conn.source(), conn.target()) {
            // Only drop the edge when no other connection still covers it
            let still_covered = inner
                .connections
                .values()
                .any(|c| c.source() == Some(source) && c.target() == Some(target));
            if !still_covered {
                if let Some(targets) = inner.adjacency.get_mut(&source) {
                    if targets.contains(&target) {
                        Arc::make_mut(targets).remove(&target);
                    }
                }
            }
        }
        inner.snapshot();
        Ok(conn.as_ref().clone())
    }

    /// Directly reachable node ids (outgoing edges only).
    pub fn neighbors(&self, id: Uuid) -> HashSet<Uuid> {
        let inner = self.lock();
        inner
            .adjacency
            .get(&id)
            .map(|targets| targets.as_ref().clone())
            .unwrap_or_default()
    }

    /// Depth-bounded iterative walk from `start`, optionally filtered.
    ///
    /// Stack-based, so visit order is not shortest-path; a visited set
    /// prevents revisits. Fails with [`SubstrateError::NotFound`] when
    /// `start` is not a registered node.
    pub fn traverse(
        &self,
        start: Uuid,
        depth: usize,
        filter: Option<&dyn Fn(&Record) -> bool>,
    ) -> Result<Vec<Record>> {
        let inner = self.lock();
        if !inner.nodes.contains_key(&start) {
            return Err(SubstrateError::NotFound { id: start });
        }
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<(Uuid, usize)> = vec![(start, 0)];
        let mut found = Vec::new();
        while let Some((id, hops)) = stack.pop() {
            if hops > depth || !visited.insert(id) {
                continue;
            }
            let Some(node) = inner.nodes.get(&id) else {
                continue;
            };
            if filter.map_or(true, |f| f(node.as_ref())) {
                found.push(node.as_ref().clone());
            }
            if let Some(targets) = inner.adjacency.get(&id) {
                for target in targets.iter() {
                    if !visited.contains(target) {
                        stack.push((*target, hops + 1));
                    }
                }
            }
        }
        Ok(found)
    }

    /// Linear scan for nodes of a given kind.
    pub fn get_nodes_by_kind(&self, kind: &Kind) -> Vec<Record> {
        let inner = self.lock();
        inner
            .nodes
            .values()
            .filter(|node| node.kind == *kind)
            .map(|node| node.as_ref().clone())
            .collect()
    }

    /// Linear scan for nodes whose content carries `key == value`.
    pub fn get_nodes_by_attribute(&self, key: &str, value: &Value) -> Vec<Record> {
        let inner = self.lock();
        inner
            .nodes
            .values()
            .filter(|node| node.content.get(key) == Some(value))
            .map(|node| node.as_ref().clone())
            .collect()
    }

    /// Walk node-to-node lineage via the first listed ancestor, oldest
    /// first, stopping when the next id is absent from the graph.
    pub fn provenance_walk(&self, id: Uuid) -> Vec<Record> {
        let inner = self.lock();
        let mut chain = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut current = id;
        loop {
            if !seen.insert(current) {
                break;
            }
            let Some(node) = inner.nodes.get(&current) else {
                break;
            };
            chain.insert(0, node.as_ref().clone());
            let Some(next) = node.metadata.provenance.first().copied() else {
                break;
            };
            current = next;
        }
        chain
    }

    /// All nodes, in no particular order.
    pub fn all_nodes(&self) -> Vec<Record> {
        self.lock()
            .nodes
            .values()
            .map(|node| node.as_ref().clone())
            .collect()
    }

    /// All connection records.
    pub fn all_connections(&self) -> Vec<Record> {
        self.lock()
            .connections
            .values()
            .map(|conn| conn.as_ref().clone())
            .collect()
    }

    /// Snapshot for a sequential version index, as listed by
    /// [`SelfMap::list_versions`].
    pub fn get_version(&self, version: &str) -> Option<Arc<SelfMapSnapshot>> {
        let index: usize = version.parse().ok()?;
        self.lock().history.get(index).cloned()
    }

    /// Version keys of the append-only history, oldest first.
    pub fn list_versions(&self) -> Vec<String> {
        let inner = self.lock();
        (0..inner.history.len()).map(|i| i.to_string()).collect()
    }
}

impl Default for SelfMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Record {
        Record::new(Kind::Memory)
    }

    #[test]
    fn test_add_get_update_remove() {
        let map = SelfMap::new();
        let record = node();
        map.add_node(record.clone()).unwrap();

        assert!(matches!(
            map.add_node(record.clone()),
            Err(SubstrateError::DuplicateId { .. })
        ));

        let updated = record.clone().with_field("note", "seen");
        map.update_node(updated.clone()).unwrap();
        assert_eq!(map.get_node(record.id).unwrap(), updated);

        map.remove_node(record.id).unwrap();
        assert!(matches!(
            map.get_node(record.id),
            Err(SubstrateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_connection_requires_registered_endpoints() {
        let map = SelfMap::new();
        let a = node();
        let b = node();
        map.add_node(a.clone()).unwrap();

        let conn = Record::connection(a.id, b.id);
        assert!(matches!(
            map.add_connection(conn.clone()),
            Err(SubstrateError::NotFound { .. })
        ));

        map.add_node(b.clone()).unwrap();
        map.add_connection(conn).unwrap();
        assert!(map.neighbors(a.id).contains(&b.id));
        // Directed: no implicit reverse edge
        assert!(!map.neighbors(b.id).contains(&a.id));
    }

    #[test]
    fn test_remove_node_cascades_connections() {
        let map = SelfMap::new();
        let a = node();
        let b = node();
        let c = node();
        for n in [&a, &b, &c] {
            map.add_node(n.clone()).unwrap();
        }
        map.add_connection(Record::connection(a.id, b.id)).unwrap();
        map.add_connection(Record::connection(b.id, c.id)).unwrap();
        map.add_connection(Record::connection(c.id, a.id)).unwrap();

        map.remove_node(b.id).unwrap();

        assert!(!map.neighbors(a.id).contains(&b.id));
        for conn in map.all_connections() {
            assert_ne!(conn.source(), Some(b.id));
            assert_ne!(conn.target(), Some(b.id));
        }
        assert_eq!(map.all_connections().len(), 1);
    }

    #[test]
    fn test_remove_connection() {
        let map = SelfMap::new();
        let a = node();
        let b = node();
        map.add_node(a.clone()).unwrap();
        map.add_node(b.clone()).unwrap();
        let conn = Record::connection(a.id, b.id);
        map.add_connection(conn.clone()).unwrap();

        map.remove_connection(conn.id).unwrap();
        assert!(map.neighbors(a.id).is_empty());
        assert!(matches!(
            map.remove_connection(conn.id),
            Err(SubstrateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_traverse_depth_and_filter() {
        let map = SelfMap::new();
        let a = node().with_field("layer", 0);
        let b = node().with_field("layer", 1);
        let c = node().with_field("layer", 2);
        for n in [&a, &b, &c] {
            map.add_node(n.clone()).unwrap();
        }
        map.add_connection(Record::connection(a.id, b.id)).unwrap();
        map.add_connection(Record::connection(b.id, c.id)).unwrap();

        let within_one = map.traverse(a.id, 1, None).unwrap();
        let ids: HashSet<Uuid> = within_one.iter().map(|r| r.id).collect();
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
        assert!(!ids.contains(&c.id));

        let filtered = map
            .traverse(a.id, 2, Some(&|r: &Record| r.field_f64("layer") == Some(2.0)))
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, c.id);

        assert!(matches!(
            map.traverse(Uuid::new_v4(), 1, None),
            Err(SubstrateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_traverse_handles_graph_cycles() {
        let map = SelfMap::new();
        let a = node();
        let b = node();
        map.add_node(a.clone()).unwrap();
        map.add_node(b.clone()).unwrap();
        map.add_connection(Record::connection(a.id, b.id)).unwrap();
        map.add_connection(Record::connection(b.id, a.id)).unwrap();

        let visited = map.traverse(a.id, 10, None).unwrap();
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_lookup_scans() {
        let map = SelfMap::new();
        let belief = Record::new(Kind::Belief).with_field("subject", "sky");
        map.add_node(belief.clone()).unwrap();
        map.add_node(node()).unwrap();

        assert_eq!(map.get_nodes_by_kind(&Kind::Belief).len(), 1);
        let found = map.get_nodes_by_attribute("subject", &Value::from("sky"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, belief.id);
    }

    #[test]
    fn test_provenance_walk_first_ancestor() {
        let map = SelfMap::new();
        let root = node();
        let mid = node().with_provenance([root.id, Uuid::new_v4()]);
        let leaf = node().with_provenance([mid.id]);
        for n in [&root, &mid, &leaf] {
            map.add_node(n.clone()).unwrap();
        }

        let chain = map.provenance_walk(leaf.id);
        let ids: Vec<Uuid> = chain.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![root.id, mid.id, leaf.id]);
    }

    #[test]
    fn test_version_history_is_append_only() {
        let map = SelfMap::new();
        assert!(map.list_versions().is_empty());

        let a = node();
        map.add_node(a.clone()).unwrap();
        map.update_node(a.clone().with_field("note", "x")).unwrap();
        map.remove_node(a.id).unwrap();

        let versions = map.list_versions();
        assert_eq!(versions, vec!["0", "1", "2"]);

        let first = map.get_version("0").unwrap();
        assert_eq!(first.nodes.len(), 1);
        let last = map.get_version("2").unwrap();
        assert!(last.nodes.is_empty());
        assert!(map.get_version("9").is_none());
    }

    #[test]
    fn test_snapshots_share_unchanged_entries() {
        let map = SelfMap::new();
        let stable = node();
        let churn = node();
        map.add_node(stable.clone()).unwrap();
        map.add_node(churn.clone()).unwrap();
        map.add_connection(Record::connection(stable.id, churn.id))
            .unwrap();
        map.update_node(churn.clone().with_field("note", "x")).unwrap();

        let before = map.get_version("2").unwrap();
        let after = map.get_version("3").unwrap();

        // The untouched node and edge set are the same allocation in
        // both versions; only the rewritten node differs
        assert!(Arc::ptr_eq(
            before.nodes.get(&stable.id).unwrap(),
            after.nodes.get(&stable.id).unwrap()
        ));
        assert!(Arc::ptr_eq(
            before.adjacency.get(&stable.id).unwrap(),
            after.adjacency.get(&stable.id).unwrap()
        ));
        assert!(!Arc::ptr_eq(
            before.nodes.get(&churn.id).unwrap(),
            after.nodes.get(&churn.id).unwrap()
        ));

        // Later mutations leave earlier snapshots untouched
        map.remove_node(stable.id).unwrap();
        assert_eq!(before.nodes.len(), 2);
    }
}
