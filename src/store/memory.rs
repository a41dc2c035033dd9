use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{normalize_key, KvStore, StoreError, Versioned};

#[derive(Clone)]
struct Entry {
    value: String,
    modify_index: u64,
}

/// In-process coordination store.
///
/// Mirrors the Consul semantics the rest of the service relies on: a single
/// monotonically increasing modify index across all keys, `KeyNotFound` for
/// missing keys and empty trees, and blocking reads that wake on any write.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    index: Arc<AtomicU64>,
    changed: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            index: Arc::new(AtomicU64::new(1)),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump(&self) -> u64 {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lookup(&self, key: &str) -> Option<Versioned> {
        self.entries.get(key).map(|e| Versioned {
            value: e.value.clone(),
            index: e.modify_index,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_versioned(&self, key: &str) -> Result<Versioned, StoreError> {
        let key = normalize_key(key);
        self.lookup(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn wait(
        &self,
        key: &str,
        index: u64,
        timeout: Duration,
    ) -> Result<Versioned, StoreError> {
        let key = normalize_key(key);
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a write between the check
            // and the await is not missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.lookup(key) {
                Some(v) if v.index > index => return Ok(v),
                current => {
                    if Instant::now() >= deadline {
                        return current.ok_or_else(|| StoreError::KeyNotFound(key.to_string()));
                    }
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self
                    .lookup(key)
                    .ok_or_else(|| StoreError::KeyNotFound(key.to_string()));
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let modify_index = self.bump();
        self.entries.insert(
            normalize_key(key).to_string(),
            Entry {
                value: value.to_string(),
                modify_index,
            },
        );
        self.changed.notify_waiters();
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError> {
        let key = normalize_key(key);
        if recursive {
            self.entries.retain(|k, _| !k.starts_with(key));
        } else {
            self.entries.remove(key);
        }
        self.bump();
        self.changed.notify_waiters();
        Ok(())
    }

    async fn recurse(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let prefix = normalize_key(prefix);
        let tree: BTreeMap<String, String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();

        if tree.is_empty() {
            return Err(StoreError::KeyNotFound(prefix.to_string()));
        }
        Ok(tree)
    }
}
