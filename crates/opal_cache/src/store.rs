//! Contract between the caching layer and its durable store.

use async_trait::async_trait;

use crate::error::CacheError;

/// Durable key-value store for compilation results.
///
/// Entries are addressed by the exact triple `(path, container, hash)`:
/// the file's canonical path, the logical operation namespace, and the
/// content hash the result was computed from. There is no prefix lookup.
///
/// Implementations own per-key write atomicity; callers may issue
/// operations concurrently.
#[async_trait]
pub trait CompilationStore: Send + Sync {
    /// Looks up the payload stored under the given key, or `None`.
    async fn get(
        &self,
        path: &str,
        container: &str,
        hash: &str,
    ) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores a payload under the given key, replacing any existing entry.
    async fn set(
        &self,
        path: &str,
        container: &str,
        hash: &str,
        data: &[u8],
    ) -> Result<(), CacheError>;

    /// Deletes every entry whose last access is older than `cutoff_millis`.
    async fn evict_older_than(&self, cutoff_millis: i64) -> Result<(), CacheError>;

    /// Flushes pending work and releases the underlying storage.
    async fn close(&self) -> Result<(), CacheError>;
}
