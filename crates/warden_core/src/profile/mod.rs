//! Profile repository contract and reconciliation.

mod reconciler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Profile, ProfileStatus, Role, UserId};

pub use reconciler::{ProfileReconciler, ReconcileOutcome};

/// Partial update applied by [`ProfileRepository::update`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub status: Option<ProfileStatus>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
}

/// Store of application profile records.
///
/// The repository is external and may be slow or unreachable; the engine
/// never calls it directly, only through [`ProfileReconciler`].
#[async_trait]
pub trait ProfileRepository: Send + Sync + std::fmt::Debug {
    async fn get_by_id(&self, id: &UserId) -> Result<Option<Profile>>;

    async fn insert(&self, profile: Profile) -> Result<Profile>;

    async fn update(&self, id: &UserId, patch: ProfilePatch) -> Result<Profile>;
}
