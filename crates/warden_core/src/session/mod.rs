//! The session store: single logical owner of the current
//! `(user, profile, session)` view.
//!
//! State lives inside one spawned actor task; everything else talks to it
//! through a cheap-clone [`SessionHandle`] and observes it through a
//! `watch` channel. All provider and repository I/O happens in helper tasks
//! whose results are generation-tagged, so a slow stale response can never
//! overwrite a newer state.

mod actor;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use warden_store::KvStore;

use crate::admin::AdminOverrideManager;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::events::EventRouter;
use crate::model::{Generation, Profile, Session, SignupMetadata, User};
use crate::profile::{ProfileReconciler, ProfileRepository};
use crate::provider::{IdentityProvider, RetryingProvider};
use crate::recovery::RecoveryCache;

pub(crate) use actor::{Msg, SessionActor, UserAction};

/// Why the engine is running on degraded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedKind {
    InitializationTimeout,
    ProviderUnavailable,
}

impl DegradedKind {
    pub fn describe(&self) -> &'static str {
        match self {
            DegradedKind::InitializationTimeout => "initialization timed out",
            DegradedKind::ProviderUnavailable => "identity provider unavailable",
        }
    }
}

/// Lifecycle state of the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has happened yet (also the post-reset state).
    Uninitialized,
    /// `initialize()` is resolving the provider session.
    Initializing,
    /// A user is signed in. The profile may still be a fallback and the
    /// session may be absent when running on recovered data.
    Authenticated,
    /// The provider reports no session.
    Unauthenticated,
    /// The safety timeout or a provider failure forced a recovery-cache
    /// lookup; about to settle.
    Recovering,
    /// No usable data could be produced.
    Degraded(DegradedKind),
}

impl SessionState {
    /// Whether initialization has reached a terminal decision.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticated
                | SessionState::Unauthenticated
                | SessionState::Degraded(_)
        )
    }
}

/// Published view of the store.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub session: Option<Session>,
    /// Effective admin flag: profile role or a valid break-glass override.
    pub is_admin: bool,
    /// True when the current data came from the recovery cache rather than
    /// the provider.
    pub degraded: bool,
    pub generation: Generation,
    /// Human-readable tag of the last non-fatal degradation, if any.
    pub error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            user: None,
            profile: None,
            session: None,
            is_admin: false,
            degraded: false,
            generation: Generation::default(),
            error: None,
        }
    }
}

/// Handle to a running session store.
///
/// Clones share the same underlying actor. The actor keeps running until
/// [`SessionHandle::shutdown`] is called, even if every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    mailbox: mpsc::Sender<Msg>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Resolve the current session from the provider.
    ///
    /// Idempotent: concurrent callers collapse onto the single in-flight
    /// attempt and all observe the same settled snapshot. Guaranteed to
    /// settle within the safety timeout regardless of provider
    /// responsiveness.
    pub async fn initialize(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(Msg::Initialize { reply: tx })
            .await
            .map_err(|_| WardenError::Closed)?;
        rx.await.map_err(|_| WardenError::Closed)
    }

    /// Current snapshot without waiting.
    pub fn current(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionSnapshot> {
        self.action(UserAction::SignIn {
            email: email.to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<SignupMetadata>,
    ) -> Result<SessionSnapshot> {
        self.action(UserAction::SignUp {
            email: email.to_string(),
            password: password.to_string(),
            metadata,
        })
        .await
    }

    pub async fn sign_in_with_oauth(&self, provider: &str) -> Result<SessionSnapshot> {
        self.action(UserAction::SignInWithOAuth {
            provider: provider.to_string(),
        })
        .await
    }

    pub async fn sign_out(&self) -> Result<SessionSnapshot> {
        self.action(UserAction::SignOut).await
    }

    pub async fn reset_password(&self, email: &str) -> Result<SessionSnapshot> {
        self.action(UserAction::ResetPassword {
            email: email.to_string(),
        })
        .await
    }

    pub async fn update_password(&self, new_password: &str) -> Result<SessionSnapshot> {
        self.action(UserAction::UpdatePassword {
            new_password: new_password.to_string(),
        })
        .await
    }

    pub async fn refresh(&self) -> Result<SessionSnapshot> {
        self.action(UserAction::Refresh).await
    }

    /// Stop the actor. Pending work is aborted; the last published snapshot
    /// stays visible to subscribers.
    pub async fn shutdown(&self) {
        let _ = self.mailbox.send(Msg::Shutdown).await;
    }

    async fn action(&self, action: UserAction) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(Msg::Action { action, reply: tx })
            .await
            .map_err(|_| WardenError::Closed)?;
        rx.await.map_err(|_| WardenError::Closed)?
    }
}

/// Builder wiring a session store out of its collaborators.
pub struct SessionStoreBuilder {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileRepository>,
    recovery_store: Arc<dyn KvStore>,
    overrides: Option<Arc<AdminOverrideManager>>,
    config: WardenConfig,
}

impl SessionStoreBuilder {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileRepository>,
        recovery_store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            provider,
            profiles,
            recovery_store,
            overrides: None,
            config: WardenConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WardenConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_override_manager(mut self, overrides: Arc<AdminOverrideManager>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Spawn the actor and the event router, returning a handle.
    pub fn spawn(self) -> SessionHandle {
        let provider: Arc<dyn IdentityProvider> = Arc::new(RetryingProvider::new(
            Arc::clone(&self.provider),
            self.config.provider_retry.clone(),
        ));
        let cache = RecoveryCache::new(Arc::clone(&self.recovery_store), self.config.cache_ttl());
        let reconciler = Arc::new(ProfileReconciler::new(
            Arc::clone(&self.profiles),
            self.config.retry.clone(),
            cache.clone(),
        ));

        let (mailbox_tx, mailbox_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (reconciling_tx, reconciling_rx) = watch::channel(false);

        EventRouter::new(
            self.provider.subscribe(),
            mailbox_tx.clone(),
            reconciling_rx,
            self.config.debounce_window(),
        )
        .spawn();

        let actor = SessionActor::new(
            provider,
            reconciler,
            cache,
            self.overrides,
            self.config,
            mailbox_rx,
            mailbox_tx.clone(),
            snapshot_tx,
            reconciling_tx,
        );
        tokio::spawn(actor.run());

        SessionHandle {
            mailbox: mailbox_tx,
            snapshot: snapshot_rx,
        }
    }
}
