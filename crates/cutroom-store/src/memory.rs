//! In-memory document store for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{DocumentStore, Version};

#[derive(Default)]
struct Entry {
    bytes: Vec<u8>,
    version: u64,
}

/// In-memory [`DocumentStore`] with counter-based version tokens.
///
/// Conflict semantics match the durable backends: a `put` against a stale
/// version fails atomically, which makes this the concurrency test double
/// for the repository's read-modify-write loop.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> StoreResult<(Vec<u8>, Version)> {
        let map = self.inner.read().await;
        match map.get(key) {
            Some(entry) => Ok((entry.bytes.clone(), Version(entry.version.to_string()))),
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn create_raw(&self, key: &str, bytes: Vec<u8>) -> StoreResult<Version> {
        let mut map = self.inner.write().await;
        if map.contains_key(key) {
            return Err(StoreError::already_exists(key));
        }
        map.insert(key.to_string(), Entry { bytes, version: 1 });
        Ok(Version("1".to_string()))
    }

    async fn put_raw(&self, key: &str, bytes: Vec<u8>, expected: &Version) -> StoreResult<Version> {
        let mut map = self.inner.write().await;
        let entry = map.get_mut(key).ok_or_else(|| StoreError::not_found(key))?;
        if entry.version.to_string() != expected.as_str() {
            return Err(StoreError::conflict(key));
        }
        entry.bytes = bytes;
        entry.version += 1;
        Ok(Version(entry.version.to_string()))
    }

    async fn delete_raw(&self, key: &str) -> StoreResult<()> {
        let mut map = self.inner.write().await;
        map.remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let map = self.inner.read().await;
        let mut keys: Vec<String> = map.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
