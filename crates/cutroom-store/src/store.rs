//! The document store contract.

use std::fmt;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Opaque concurrency token.
///
/// A `put` succeeds only if the backend's current token for the key equals
/// the one supplied; otherwise it fails atomically with `Conflict`. Tokens
/// are backend-defined (S3 ETag, in-memory counter) and carry no ordering
/// semantics for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(pub String);

impl Version {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generic optimistic-concurrency key/value store over a durable backend.
///
/// This is the single synchronization primitive the orchestration core
/// relies on; no in-process locks are assumed because multiple process
/// instances may run concurrently.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document and its current version token.
    async fn get_raw(&self, key: &str) -> StoreResult<(Vec<u8>, Version)>;

    /// Create a new document. Fails with `AlreadyExists` if the key is taken.
    async fn create_raw(&self, key: &str, bytes: Vec<u8>) -> StoreResult<Version>;

    /// Conditionally replace a document.
    ///
    /// Succeeds only if the backend's current version equals `expected`;
    /// otherwise fails with `Conflict` and no partial write.
    async fn put_raw(&self, key: &str, bytes: Vec<u8>, expected: &Version) -> StoreResult<Version>;

    /// Delete a document unconditionally. Deleting an absent key is an error.
    async fn delete_raw(&self, key: &str) -> StoreResult<()>;

    /// List keys under a prefix.
    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
