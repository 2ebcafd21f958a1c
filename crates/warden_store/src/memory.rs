//! In-process key-value storage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{StoreError, StoreResult};
use crate::kv::KvStore;

/// Volatile in-process store.
///
/// Useful as the primary override store (which intentionally does not
/// survive a restart) and as a test double for [`crate::SledStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), Vec<u8>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.ensure_open()?;
        self.entries
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.entries
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.entries.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
        Ok(())
    }
}
