//! Recovery cache: durable last-known-good snapshots.
//!
//! Written through on every successful reconciliation, read only when the
//! safety timer fires or the profile repository is exhausted. Replaces the
//! original ad hoc "emergency recovery" reads of arbitrary local keys with
//! one namespaced store and an explicit freshness policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use warden_store::KvStore;

use crate::error::Result;
use crate::model::{CacheEntry, UserId};

const NAMESPACE: &str = "recovery";
const LATEST_KEY: &str = "::latest";

/// Per-user durable snapshot store with a freshness cutoff.
///
/// `get`/`put` are last-write-wins; the cache assumes a single consumer and
/// takes no cross-process locks.
#[derive(Debug, Clone)]
pub struct RecoveryCache {
    store: Arc<dyn KvStore>,
    ttl: Option<Duration>,
}

impl RecoveryCache {
    /// Create a cache over the given store. Entries older than `ttl` are
    /// treated as absent; `None` trusts snapshots of any age.
    pub fn new(store: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Fetch the snapshot for a user, if present and fresh enough.
    pub async fn get(&self, user_id: &UserId) -> Result<Option<CacheEntry>> {
        let Some(bytes) = self.store.get(NAMESPACE, &user_id.to_string()).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        Ok(self.check_freshness(entry))
    }

    /// Fetch the most recently written snapshot regardless of user.
    ///
    /// Used when recovery is needed before the provider ever told us who the
    /// current user is.
    pub async fn latest(&self) -> Result<Option<CacheEntry>> {
        let Some(pointer) = self.store.get(NAMESPACE, LATEST_KEY).await? else {
            return Ok(None);
        };
        let key = String::from_utf8_lossy(&pointer).to_string();
        let Some(bytes) = self.store.get(NAMESPACE, &key).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        Ok(self.check_freshness(entry))
    }

    /// Write a snapshot, replacing any previous one for the same user.
    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let key = entry.user_id.to_string();
        let bytes = serde_json::to_vec(entry)?;
        self.store.put(NAMESPACE, &key, bytes).await?;
        self.store
            .put(NAMESPACE, LATEST_KEY, key.clone().into_bytes())
            .await?;
        debug!(user_id = %entry.user_id, "Recovery snapshot written");
        Ok(())
    }

    fn check_freshness(&self, entry: CacheEntry) -> Option<CacheEntry> {
        let Some(ttl) = self.ttl else {
            return Some(entry);
        };
        let age = entry.age(Utc::now()).to_std().unwrap_or_default();
        if age > ttl {
            warn!(
                user_id = %entry.user_id,
                age_secs = age.as_secs(),
                "Recovery snapshot is stale, ignoring"
            );
            None
        } else {
            Some(entry)
        }
    }
}
