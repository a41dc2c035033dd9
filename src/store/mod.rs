//! Coordination store: the key/value service that holds job records and
//! cluster readiness records.
//!
//! Every cross-task signal in the service goes through this store. The
//! dispatcher writes job state, the watcher polls cluster state and the
//! status endpoint reads job state back; none of them share memory.

pub mod consul;
pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use consul::ConsulStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key {0} does not exist")]
    KeyNotFound(String),

    #[error("store request failed: {0}")]
    Http(String),

    #[error("store returned {status} for {operation}")]
    Status { operation: &'static str, status: u16 },

    #[error("undecodable store response: {0}")]
    Decode(String),
}

/// A value together with the store index at which it was last modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub index: u64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key and the index of its last modification.
    async fn get_versioned(&self, key: &str) -> Result<Versioned, StoreError>;

    /// Blocking read: returns once the key has been modified after `index`,
    /// or with the current value when `timeout` elapses.
    async fn wait(&self, key: &str, index: u64, timeout: Duration)
        -> Result<Versioned, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a key, or the whole tree below it when `recursive` is set.
    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, keyed by full path.
    /// An empty tree is reported as `KeyNotFound`.
    async fn recurse(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError>;

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.get_versioned(key).await?.value)
    }

    /// Like `get`, but a missing key is `None` instead of an error.
    async fn get_opt(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key).await {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Keys are addressed without a leading slash, as Consul does.
pub(crate) fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}
