use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use shared::domain::{Forageable, ForageableId};
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::{live_lookup, live_query, ForageableStore, RecordStream, StoreError};

/// Process-local store with the same notification model as the SQLite store.
#[derive(Clone)]
pub struct MemoryForageableStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    changes: watch::Sender<u64>,
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<ForageableId, Forageable>,
    last_id: i64,
}

impl MemoryForageableStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(MemoryState::default()),
                changes,
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn snapshot(&self) -> Vec<Forageable> {
        self.inner.state.read().await.records.values().cloned().collect()
    }

    async fn lookup(&self, id: ForageableId) -> Option<Forageable> {
        self.inner.state.read().await.records.get(&id).cloned()
    }

    fn notify(&self) {
        self.inner.changes.send_modify(|version| *version += 1);
    }
}

impl Default for MemoryForageableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ForageableStore for MemoryForageableStore {
    fn query_all(&self) -> RecordStream<Vec<Forageable>> {
        let store = self.clone();
        live_query(self.inner.changes.subscribe(), move || {
            let store = store.clone();
            async move { Ok(store.snapshot().await) }
        })
    }

    fn query_by_id(&self, id: ForageableId) -> RecordStream<Forageable> {
        let store = self.clone();
        live_lookup(self.inner.changes.subscribe(), move || {
            let store = store.clone();
            async move { Ok(store.lookup(id).await) }
        })
    }

    async fn insert(&self, forageable: &Forageable) -> Result<ForageableId, StoreError> {
        let id = {
            let mut state = self.inner.state.write().await;
            let id = match forageable.id {
                Some(id) if state.records.contains_key(&id) => {
                    return Err(StoreError::Conflict(id));
                }
                Some(id) => id,
                None => ForageableId(state.last_id + 1),
            };
            state.last_id = state.last_id.max(id.0);
            state.records.insert(
                id,
                Forageable {
                    id: Some(id),
                    ..forageable.clone()
                },
            );
            id
        };

        debug!(forageable_id = id.0, "inserted forageable");
        self.notify();
        Ok(id)
    }

    async fn update(&self, forageable: &Forageable) -> Result<bool, StoreError> {
        let Some(id) = forageable.id else {
            return Ok(false);
        };

        let changed = {
            let mut state = self.inner.state.write().await;
            match state.records.get_mut(&id) {
                Some(existing) => {
                    *existing = forageable.clone();
                    true
                }
                None => false,
            }
        };

        if changed {
            self.notify();
        }
        Ok(changed)
    }

    async fn delete(&self, forageable: &Forageable) -> Result<bool, StoreError> {
        let Some(id) = forageable.id else {
            return Ok(false);
        };

        let changed = self.inner.state.write().await.records.remove(&id).is_some();
        if changed {
            self.notify();
        }
        Ok(changed)
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
