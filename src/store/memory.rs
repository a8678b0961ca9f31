//! InMemoryDocumentStore - map-backed document store for tests and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{merge_patch, ChangeStream, Document, DocumentStore, Filter, Snapshot, StoreError, Write};

struct StoredDocument {
    data: Document,
    version: u64,
}

struct Subscriber {
    collection: String,
    filter: Filter,
    sender: mpsc::UnboundedSender<Result<Vec<Snapshot>, StoreError>>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    counters: HashMap<String, u64>,
    subscribers: Vec<Subscriber>,
}

impl State {
    fn snapshot(&self, collection: &str, filter: &Filter) -> Vec<Snapshot> {
        self.collections.get(collection).into_iter()
            .flat_map(|docs| docs.iter())
            .filter(|(_, stored)| filter.matches(&stored.data))
            .map(|(id, stored)| Snapshot { id: id.clone(), version: stored.version, data: stored.data.clone() })
            .collect()
    }

    /// Validates a write against current state without applying it.
    fn check(&self, write: &Write) -> Result<(), StoreError> {
        if let Write::Update { collection, id, patch } = write {
            let exists = self.collections.get(collection).is_some_and(|docs| docs.contains_key(id));
            if !exists {
                return Err(StoreError::NotFound { collection: collection.clone(), id: id.clone() });
            }
            if !patch.is_object() {
                return Err(StoreError::Serde("update requires object documents".into()));
            }
        }
        Ok(())
    }

    /// Applies a checked write; returns the new version and the pre-image.
    fn apply(&mut self, write: Write) -> Result<(String, u64, Option<Document>, Document), StoreError> {
        match write {
            Write::Set { collection, id, data } => {
                let docs = self.collections.entry(collection.clone()).or_default();
                let previous = docs.remove(&id);
                let version = previous.as_ref().map_or(1, |p| p.version + 1);
                docs.insert(id, StoredDocument { data: data.clone(), version });
                Ok((collection, version, previous.map(|p| p.data), data))
            }
            Write::Update { collection, id, patch } => {
                let stored = self.collections.get_mut(&collection)
                    .and_then(|docs| docs.get_mut(&id))
                    .ok_or_else(|| StoreError::NotFound { collection: collection.clone(), id: id.clone() })?;
                let previous = stored.data.clone();
                merge_patch(&mut stored.data, patch)?;
                stored.version += 1;
                Ok((collection, stored.version, Some(previous), stored.data.clone()))
            }
        }
    }

    /// Pushes fresh result sets to every subscriber whose filter saw the change.
    fn notify(&mut self, collection: &str, before: Option<&Document>, after: &Document) {
        let mut pending = Vec::new();
        for (idx, sub) in self.subscribers.iter().enumerate() {
            let touched = sub.filter.matches(after) || before.is_some_and(|b| sub.filter.matches(b));
            if sub.collection == collection && touched {
                pending.push(idx);
            }
        }
        for idx in pending {
            let (coll, filter) = (self.subscribers[idx].collection.clone(), self.subscribers[idx].filter.clone());
            let snapshot = self.snapshot(&coll, &filter);
            // A failed send means the receiver was dropped; it is pruned below.
            let _ = self.subscribers[idx].sender.send(Ok(snapshot));
        }
        self.subscribers.retain(|s| !s.sender.is_closed());
    }

    fn write_all(&mut self, writes: Vec<Write>) -> Result<Vec<u64>, StoreError> {
        writes.iter().try_for_each(|w| self.check(w))?;
        let mut versions = Vec::with_capacity(writes.len());
        for write in writes {
            let (collection, version, before, after) = self.apply(write)?;
            self.notify(&collection, before.as_ref(), &after);
            versions.push(version);
        }
        Ok(versions)
    }
}

/// In-memory document store. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self { Self::default() }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::Backend("lock poisoned".into()))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Snapshot>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(state.collections.get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| Snapshot { id: id.to_string(), version: stored.version, data: stored.data.clone() }))
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<u64, StoreError> {
        let versions = self.write()?.write_all(vec![Write::set(collection, id, data)])?;
        versions.first().copied().ok_or_else(|| StoreError::Backend("empty write result".into()))
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<u64, StoreError> {
        let versions = self.write()?.write_all(vec![Write::update(collection, id, patch)])?;
        versions.first().copied().ok_or_else(|| StoreError::Backend("empty write result".into()))
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Snapshot>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(state.snapshot(collection, filter))
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<ChangeStream, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.write()?;
        // The receiver is still held here, so this initial send cannot fail.
        let _ = sender.send(Ok(state.snapshot(collection, &filter)));
        state.subscribers.push(Subscriber { collection: collection.to_string(), filter, sender });
        Ok(receiver)
    }

    async fn next_sequence(&self, counter: &str) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let value = state.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<Vec<u64>, StoreError> {
        self.write()?.write_all(writes)
    }
}
