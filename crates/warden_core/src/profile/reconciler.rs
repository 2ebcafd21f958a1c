//! Profile reconciliation with bounded retries and fallback synthesis.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::{CacheEntry, Profile, SignupMetadata, User};
use crate::profile::ProfileRepository;
use crate::recovery::RecoveryCache;
use crate::retry::RetryConfig;

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The authoritative profile was fetched or created.
    Fresh(Profile),
    /// The repository was exhausted; this profile is synthesized in-memory
    /// and not guaranteed persisted.
    Fallback { profile: Profile, attempts: u32 },
}

impl ReconcileOutcome {
    pub fn profile(&self) -> &Profile {
        match self {
            ReconcileOutcome::Fresh(profile) => profile,
            ReconcileOutcome::Fallback { profile, .. } => profile,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ReconcileOutcome::Fallback { .. })
    }
}

/// Fetch-or-create wrapper around the profile repository.
///
/// Retries under the configured policy, merges stashed signup metadata into
/// the first insert, and synthesizes a fallback profile on exhaustion. Every
/// outcome is written through to the recovery cache so a later timeout can
/// restore it.
#[derive(Debug)]
pub struct ProfileReconciler {
    repo: Arc<dyn ProfileRepository>,
    policy: RetryConfig,
    cache: RecoveryCache,
    stash: Mutex<Option<SignupMetadata>>,
}

impl ProfileReconciler {
    pub fn new(repo: Arc<dyn ProfileRepository>, policy: RetryConfig, cache: RecoveryCache) -> Self {
        Self {
            repo,
            policy,
            cache,
            stash: Mutex::new(None),
        }
    }

    /// Stash signup details to be merged into the next profile creation.
    /// Single-use: cleared once an insert succeeds.
    pub fn stash_signup_metadata(&self, metadata: SignupMetadata) {
        *self.stash.lock() = Some(metadata);
    }

    /// Resolve the profile for a user, never failing outright.
    ///
    /// Presence of user + session is sufficient for "authenticated"; a
    /// fallback outcome tags the non-fatal profile timeout.
    pub async fn ensure_profile(&self, user: &User) -> ReconcileOutcome {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.attempt_once(user).await {
                Ok(profile) => {
                    if profile.id != user.id {
                        warn!(
                            user_id = %user.id,
                            profile_id = %profile.id,
                            "Repository returned a profile for a different user, discarding"
                        );
                    } else {
                        self.write_snapshot(user, &profile).await;
                        return ReconcileOutcome::Fresh(profile);
                    }
                }
                Err(e) => {
                    debug!(
                        user_id = %user.id,
                        attempt,
                        error = %e,
                        "Profile reconciliation attempt failed"
                    );
                }
            }
            tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
        }

        warn!(
            user_id = %user.id,
            attempts = max_attempts,
            "Profile repository exhausted, synthesizing fallback profile"
        );
        let fallback = Profile::fallback(user);
        self.write_snapshot(user, &fallback).await;
        ReconcileOutcome::Fallback {
            profile: fallback,
            attempts: max_attempts,
        }
    }

    async fn attempt_once(&self, user: &User) -> crate::error::Result<Profile> {
        if let Some(existing) = self.repo.get_by_id(&user.id).await? {
            return Ok(existing);
        }

        // Absent: create lazily, merging any stashed signup details.
        let payload = self.creation_payload(user);
        let inserted = self.repo.insert(payload).await?;
        *self.stash.lock() = None;
        Ok(inserted)
    }

    fn creation_payload(&self, user: &User) -> Profile {
        let mut profile = Profile::fallback(user);
        if let Some(metadata) = self.stash.lock().clone() {
            profile.first_name = metadata.first_name;
            profile.last_name = metadata.last_name;
            profile.company = metadata.company;
        }
        profile
    }

    async fn write_snapshot(&self, user: &User, profile: &Profile) {
        let entry = CacheEntry::new(user.clone(), Some(profile.clone()));
        if let Err(e) = self.cache.put(&entry).await {
            warn!(user_id = %user.id, error = %e, "Failed to write recovery snapshot");
        }
    }
}
