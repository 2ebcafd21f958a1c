//! The namespaced key-value contract.

use async_trait::async_trait;

use crate::error::StoreResult;

/// Namespaced key-value store.
///
/// Values are opaque bytes; callers own their serialization. Writes are
/// last-write-wins and the store assumes a single consumer per namespace
/// (no cross-process locking).
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Fetch a value, or `None` if the key is absent.
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()>;

    /// Remove every key in a namespace.
    async fn clear(&self, namespace: &str) -> StoreResult<()>;

    /// Flush and shut down. Later operations fail with `StoreError::Closed`.
    async fn close(&self) -> StoreResult<()>;
}
