//! Durable key-value storage backed by sled.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::kv::KvStore;

/// Durable store handle.
///
/// One sled tree per namespace; trees are opened lazily and cached for the
/// lifetime of the handle. Every write is flushed before returning so that a
/// crash immediately after `put` cannot lose the value.
#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
    trees: DashMap<String, sled::Tree>,
    closed: AtomicBool,
}

impl SledStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening warden store: {}", path.to_string_lossy());
        let db = sled::open(path)?;

        Ok(Self {
            db,
            trees: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a temporary store that is discarded on drop (for testing).
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            trees: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Check if the backing database is healthy.
    pub fn health_check(&self) -> StoreResult<()> {
        self.ensure_open()?;
        self.db.checksum()?;
        Ok(())
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn tree(&self, namespace: &str) -> StoreResult<sled::Tree> {
        if let Some(tree) = self.trees.get(namespace) {
            return Ok(tree.clone());
        }
        let tree = self.db.open_tree(namespace)?;
        self.trees.insert(namespace.to_string(), tree.clone());
        Ok(tree)
    }
}

#[async_trait]
impl KvStore for SledStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let tree = self.tree(namespace)?;
        Ok(tree.get(key)?.map(|ivec| ivec.to_vec()))
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.ensure_open()?;
        let tree = self.tree(namespace)?;
        tree.insert(key, value)?;
        tree.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let tree = self.tree(namespace)?;
        tree.remove(key)?;
        tree.flush_async().await?;
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let tree = self.tree(namespace)?;
        tree.clear()?;
        tree.flush_async().await?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Closing warden store");
        self.trees.clear();
        self.db.flush_async().await?;
        Ok(())
    }
}
