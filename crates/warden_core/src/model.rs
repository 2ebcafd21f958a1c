//! Core data model for session reconciliation.
//!
//! The engine derives one consistent `(user, profile, session)` triple from
//! three sources of truth: the identity provider owns sessions and users, the
//! profile repository owns application profiles, and the recovery cache holds
//! the last-known-good snapshot per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by a user and their profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Ephemeral proof of continued authentication with the identity provider.
///
/// The provider owns the authoritative session; the engine keeps a reference
/// copy that is replaced on refresh and dropped on sign-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque access token.
    pub access_token: String,
    /// Refresh token (if the provider issued one).
    pub refresh_token: Option<String>,
    /// Token expiration time (if provided).
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Check if this session should be refreshed.
    ///
    /// Returns `true` if the session will expire within the next 5 minutes,
    /// or has already expired. Returns `false` if there is no expiration set.
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let refresh_threshold = Utc::now() + chrono::Duration::minutes(5);
                expires_at <= refresh_threshold
            }
            None => false,
        }
    }

    /// Check if this session has expired.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now(),
            None => false,
        }
    }
}

/// Identity-provider user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Provider-side metadata blob, passed through untouched.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl User {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Application-level role, distinct from any provider-side claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    TeamMember,
}

/// Profile lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Active,
    Inactive,
    Banned,
    Pending,
}

/// Persisted application record of role/status for a user.
///
/// `id` always equals the owning user's id. A profile may be absent; the
/// engine creates one lazily on first authenticated reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    pub status: ProfileStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Synthesize an in-memory fallback profile for a user whose
    /// authoritative record could not be fetched or created in time.
    ///
    /// Not guaranteed to be persisted; presence of user + session is
    /// sufficient for "authenticated" and the profile is best-effort.
    pub fn fallback(user: &User) -> Self {
        let now = Utc::now();
        Self {
            id: user.id,
            email: user.email.clone(),
            role: Role::User,
            status: ProfileStatus::Active,
            first_name: None,
            last_name: None,
            company: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Single-use signup details stashed before account creation and merged
/// into the first profile insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignupMetadata {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
}

/// Time-boxed manual privilege elevation record.
///
/// Valid only while `active`, the stored email matches, and `expires_at`
/// has not passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub active: bool,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl OverrideRecord {
    /// Check whether this record elevates the given email at `now`.
    pub fn is_valid_for(&self, email: &str, now: DateTime<Utc>) -> bool {
        self.active && self.email.eq_ignore_ascii_case(email) && now < self.expires_at
    }
}

/// Last-known-good snapshot for a user, consulted only on timeout or
/// repository failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub user_id: UserId,
    pub user: User,
    pub profile: Option<Profile>,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(user: User, profile: Option<Profile>) -> Self {
        Self {
            user_id: user.id,
            user,
            profile,
            cached_at: Utc::now(),
        }
    }

    /// Age of this snapshot at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.cached_at)
    }
}

/// Monotonic counter tagging each reconciliation attempt.
///
/// A result tagged with a generation older than the store's current one is
/// discarded, so a slow stale response can never overwrite a newer state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry() {
        let fresh = Session {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(!fresh.is_expired());
        assert!(!fresh.needs_refresh());

        let expiring = Session {
            expires_at: Some(Utc::now() + chrono::Duration::minutes(2)),
            ..fresh.clone()
        };
        assert!(!expiring.is_expired());
        assert!(expiring.needs_refresh());

        let eternal = Session {
            expires_at: None,
            ..fresh
        };
        assert!(!eternal.is_expired());
        assert!(!eternal.needs_refresh());
    }

    #[test]
    fn test_override_validity_window() {
        let now = Utc::now();
        let record = OverrideRecord {
            active: true,
            email: "ops@example.com".to_string(),
            expires_at: now + chrono::Duration::hours(1),
        };

        assert!(record.is_valid_for("ops@example.com", now));
        // Email matching is case-insensitive
        assert!(record.is_valid_for("Ops@Example.COM", now));
        // Different email never matches
        assert!(!record.is_valid_for("other@example.com", now));
        // Expired two hours from now
        assert!(!record.is_valid_for("ops@example.com", now + chrono::Duration::hours(2)));

        let inactive = OverrideRecord {
            active: false,
            ..record
        };
        assert!(!inactive.is_valid_for("ops@example.com", now));
    }

    #[test]
    fn test_fallback_profile_shape() {
        let user = User::new(UserId::new(), "a@x.com");
        let profile = Profile::fallback(&user);

        assert_eq!(profile.id, user.id);
        assert_eq!(profile.email, "a@x.com");
        assert_eq!(profile.role, Role::User);
        assert_eq!(profile.status, ProfileStatus::Active);
        assert!(profile.first_name.is_none());
    }

    #[test]
    fn test_generation_ordering() {
        let g0 = Generation::default();
        let g1 = g0.next();
        let g2 = g1.next();

        assert!(g0 < g1);
        assert!(g1 < g2);
        assert_eq!(g2.get(), 2);
    }

    #[test]
    fn test_cache_entry_age() {
        let user = User::new(UserId::new(), "a@x.com");
        let entry = CacheEntry::new(user, None);
        let later = entry.cached_at + chrono::Duration::minutes(2);

        assert_eq!(entry.age(later), chrono::Duration::minutes(2));
    }

    #[test]
    fn test_role_serde_names() {
        assert_eq!(serde_json::to_string(&Role::TeamMember).unwrap(), "\"team_member\"");
        assert_eq!(
            serde_json::to_string(&ProfileStatus::Banned).unwrap(),
            "\"banned\""
        );
    }
}
