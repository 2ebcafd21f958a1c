//! Break-glass admin override management.
//!
//! Manual, time-boxed privilege elevation that bypasses the profile role
//! check. Records are written redundantly to a primary and a fallback store
//! so losing either one does not drop an active override. This is a client
//! library: elevation is still client-trusted data, so every mutation and
//! every successful match is audit-logged, and requests that fail the local
//! policy are rejected outright. Server-side gating belongs to the
//! deployment.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use warden_store::KvStore;

use crate::error::{Result, WardenError};
use crate::model::{OverrideRecord, Profile, Role, User};

const NAMESPACE: &str = "overrides";

/// Longest elevation a single request may grant.
const MAX_DURATION_HOURS: i64 = 24;

/// Manager for time-boxed privilege overrides.
#[derive(Debug, Clone)]
pub struct AdminOverrideManager {
    primary: Arc<dyn KvStore>,
    fallback: Arc<dyn KvStore>,
}

impl AdminOverrideManager {
    pub fn new(primary: Arc<dyn KvStore>, fallback: Arc<dyn KvStore>) -> Self {
        Self { primary, fallback }
    }

    /// Enable an override for `email`, expiring after `duration_hours`.
    ///
    /// Rejects blank or malformed emails and durations outside
    /// `(0, 24]` hours.
    pub async fn enable(&self, email: &str, duration_hours: i64) -> Result<OverrideRecord> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(WardenError::OverrideRejected {
                reason: "email is empty or malformed".to_string(),
            });
        }
        if duration_hours <= 0 || duration_hours > MAX_DURATION_HOURS {
            return Err(WardenError::OverrideRejected {
                reason: format!(
                    "duration must be between 1 and {} hours, got {}",
                    MAX_DURATION_HOURS, duration_hours
                ),
            });
        }

        let record = OverrideRecord {
            active: true,
            email: email.to_string(),
            expires_at: Utc::now() + Duration::hours(duration_hours),
        };
        self.write_both(&record).await?;

        info!(
            email,
            expires_at = %record.expires_at,
            "AUDIT admin override enabled"
        );
        Ok(record)
    }

    /// Disable any override for `email` in both stores.
    pub async fn disable(&self, email: &str) -> Result<()> {
        let key = Self::key(email);
        let primary = self.primary.delete(NAMESPACE, &key).await;
        let fallback = self.fallback.delete(NAMESPACE, &key).await;
        primary.or(fallback)?;

        info!(email, "AUDIT admin override disabled");
        Ok(())
    }

    /// Check whether a currently-valid override exists for `email`.
    ///
    /// The primary store is consulted first; the fallback only covers for a
    /// lost or unreadable primary record. Store failures degrade to "no
    /// override" rather than erroring the caller.
    pub async fn has_valid_override(&self, email: &str) -> bool {
        let now = Utc::now();
        for (name, store) in [("primary", &self.primary), ("fallback", &self.fallback)] {
            match self.read(store.as_ref(), email).await {
                Ok(Some(record)) if record.is_valid_for(email, now) => {
                    info!(email, store = name, "AUDIT admin override matched");
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(email, store = name, error = %e, "Override store read failed");
                }
            }
        }
        false
    }

    /// Effective admin check: profile role, or a valid break-glass override
    /// for the user's email.
    pub async fn is_admin(&self, user: &User, profile: Option<&Profile>) -> bool {
        if profile.is_some_and(|p| p.role == Role::Admin) {
            return true;
        }
        self.has_valid_override(&user.email).await
    }

    async fn write_both(&self, record: &OverrideRecord) -> Result<()> {
        let key = Self::key(&record.email);
        let bytes = serde_json::to_vec(record)?;

        let primary = self.primary.put(NAMESPACE, &key, bytes.clone()).await;
        let fallback = self.fallback.put(NAMESPACE, &key, bytes).await;

        match (primary, fallback) {
            (Err(p), Err(_)) => {
                warn!(email = %record.email, error = %p, "Both override stores rejected the write");
                Err(p.into())
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                debug!(email = %record.email, error = %e, "Override written to one store only");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn read(&self, store: &dyn KvStore, email: &str) -> Result<Option<OverrideRecord>> {
        let Some(bytes) = store.get(NAMESPACE, &Self::key(email)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn key(email: &str) -> String {
        email.trim().to_ascii_lowercase()
    }
}
