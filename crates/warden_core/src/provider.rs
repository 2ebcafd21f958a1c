//! Identity provider contract.
//!
//! The engine talks to exactly one provider interface; any SDK-vs-REST
//! fallback a concrete client needs lives behind it, so callers never see
//! duplicated call paths. Transient failures on the read paths are retried
//! here, inside the client boundary, and only the final outcome escapes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::{Session, SignupMetadata, User};
use crate::retry::{run_with_retry, RetryConfig};

/// Push event from the identity provider.
///
/// `Reset` is a locally-defined signal (not emitted by real providers) that
/// forces the engine back to its uninitialized state.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    Reset,
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::SignedOut => "signed_out",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::Reset => "reset",
        }
    }
}

/// Client for the remote identity provider.
///
/// Sessions and users are owned by the provider; the engine only holds
/// reference copies. `sign_up` may return no session when the provider
/// requires email confirmation before the first sign-in.
#[async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<SignupMetadata>,
    ) -> Result<Option<Session>>;

    async fn sign_out(&self) -> Result<()>;

    async fn get_session(&self) -> Result<Option<Session>>;

    async fn get_user(&self) -> Result<Option<User>>;

    async fn refresh_session(&self) -> Result<Session>;

    /// Redirect-based OAuth sign-in. Resolves once the redirect has been
    /// issued; the resulting session arrives later as a `SignedIn` event.
    async fn sign_in_with_oauth(&self, provider: &str) -> Result<()>;

    async fn reset_password(&self, email: &str) -> Result<()>;

    async fn update_password(&self, new_password: &str) -> Result<Session>;

    /// Subscribe to the provider's push-event stream.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Provider wrapper that retries transient failures on the read paths.
///
/// Mutating calls (sign-in/up/out, password changes) are never retried here:
/// re-submitting them could double-apply, and credential failures are fatal
/// to the call anyway.
#[derive(Debug, Clone)]
pub struct RetryingProvider {
    inner: Arc<dyn IdentityProvider>,
    policy: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn IdentityProvider>, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl IdentityProvider for RetryingProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<SignupMetadata>,
    ) -> Result<Option<Session>> {
        self.inner.sign_up(email, password, metadata).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.inner.sign_out().await
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        run_with_retry(&self.policy, "get_session", |_| self.inner.get_session()).await
    }

    async fn get_user(&self) -> Result<Option<User>> {
        run_with_retry(&self.policy, "get_user", |_| self.inner.get_user()).await
    }

    async fn refresh_session(&self) -> Result<Session> {
        run_with_retry(&self.policy, "refresh_session", |_| {
            self.inner.refresh_session()
        })
        .await
    }

    async fn sign_in_with_oauth(&self, provider: &str) -> Result<()> {
        self.inner.sign_in_with_oauth(provider).await
    }

    async fn reset_password(&self, email: &str) -> Result<()> {
        self.inner.reset_password(email).await
    }

    async fn update_password(&self, new_password: &str) -> Result<Session> {
        self.inner.update_password(new_password).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.subscribe()
    }
}
