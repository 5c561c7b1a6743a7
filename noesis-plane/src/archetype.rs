//! Archetype broadcast: shared template records with push notification.
//!
//! Archetypes are published once under a caller-chosen id and never
//! mutated in place; consumers either query the catalog or subscribe for
//! push delivery of future publications. `instantiate` stamps a fresh
//! record out of an archetype without registering it anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use noesis_core::{Kind, Record, Result, SubstrateError};

/// Async callback invoked with each published archetype.
pub type ArchetypeCallback = Arc<dyn Fn(Record) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Delivery filter; `true` means the subscriber receives the record.
pub type ArchetypeFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    callback: ArchetypeCallback,
    filter: Option<ArchetypeFilter>,
}

#[derive(Default)]
struct BroadcasterState {
    archetypes: HashMap<Uuid, Record>,
    /// Publication order, backing query results
    order: Vec<Uuid>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

/// Catalog of published archetypes with push subscription.
pub struct ArchetypeBroadcaster {
    state: Mutex<BroadcasterState>,
}

impl ArchetypeBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BroadcasterState::default()),
        }
    }

    /// Publish an archetype and deliver it to matching subscribers.
    ///
    /// Fails with [`SubstrateError::DuplicateId`] when the id was already
    /// published. A callback error is logged and delivery continues to
    /// the remaining subscribers.
    pub async fn publish(&self, archetype: Record) -> Result<()> {
        archetype.validate()?;
        let deliveries: Vec<(u64, ArchetypeCallback)> = {
            let mut state = self.state.lock().await;
            if state.archetypes.contains_key(&archetype.id) {
                return Err(SubstrateError::DuplicateId { id: archetype.id });
            }
            debug!(archetype_id = %archetype.id, kind = archetype.kind.as_str(), "publishing archetype");
            state.order.push(archetype.id);
            state.archetypes.insert(archetype.id, archetype.clone());
            state
                .subscribers
                .iter()
                .filter(|s| s.filter.as_ref().map_or(true, |f| f(&archetype)))
                .map(|s| (s.id, Arc::clone(&s.callback)))
                .collect()
        };

        for (subscriber_id, callback) in deliveries {
            if let Err(e) = callback(archetype.clone()).await {
                warn!(
                    archetype_id = %archetype.id,
                    subscriber_id,
                    error = %e,
                    "archetype delivery failed"
                );
            }
        }
        Ok(())
    }

    /// Subscribe for push delivery of future publications.
    pub async fn subscribe(
        &self,
        callback: ArchetypeCallback,
        filter: Option<ArchetypeFilter>,
    ) -> SubscriptionId {
        let mut state = self.state.lock().await;
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.subscribers.push(Subscriber {
            id,
            callback,
            filter,
        });
        SubscriptionId(id)
    }

    /// Drop a subscription; returns whether it existed.
    pub async fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != subscription.0);
        state.subscribers.len() != before
    }

    /// Retrieve a published archetype by id.
    pub async fn get(&self, id: Uuid) -> Result<Record> {
        let state = self.state.lock().await;
        state
            .archetypes
            .get(&id)
            .cloned()
            .ok_or(SubstrateError::NotFound { id })
    }

    /// Query the catalog, in publication order.
    pub async fn query(&self, query: &ArchetypeQuery) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.archetypes.get(id))
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }

    /// Stamp a fresh record out of an archetype.
    ///
    /// The clone gets a new id and fresh timestamps, and the archetype's
    /// id is appended to its provenance. The result is returned to the
    /// caller and registered nowhere.
    pub async fn instantiate(
        &self,
        id: Uuid,
        customize: Option<&(dyn Fn(&mut Record) + Sync)>,
    ) -> Result<Record> {
        let archetype = self.get(id).await?;
        let mut instance = Record::new(archetype.kind.clone())
            .with_content(archetype.content.clone())
            .with_confidence(archetype.metadata.confidence);
        instance.metadata.provenance = archetype.metadata.provenance.clone();
        instance.metadata.provenance.push(archetype.id);
        if let Some(customize) = customize {
            customize(&mut instance);
        }
        instance.validate()?;
        Ok(instance)
    }
}

impl Default for ArchetypeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Conjunctive optional filters for [`ArchetypeBroadcaster::query`].
#[derive(Default)]
pub struct ArchetypeQuery {
    id: Option<Uuid>,
    kind: Option<Kind>,
    tags: Option<Vec<String>>,
    predicate: Option<Box<dyn Fn(&Record) -> bool + Send + Sync>>,
}

impl ArchetypeQuery {
    /// Empty query matching every archetype.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a single archetype id.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Match archetypes of this kind.
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Match archetypes whose `content.tags` contains all given tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Match archetypes passing an arbitrary predicate.
    pub fn predicate(mut self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn matches(&self, record: &Record) -> bool {
        if self.id.is_some_and(|id| record.id != id) {
            return false;
        }
        if let Some(kind) = &self.kind {
            if record.kind != *kind {
                return false;
            }
        }
        if let Some(wanted) = &self.tags {
            let tags: Vec<&str> = record
                .content
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if !wanted.iter().all(|t| tags.contains(&t.as_str())) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(record) {
                return false;
            }
        }
        true
    }
}
