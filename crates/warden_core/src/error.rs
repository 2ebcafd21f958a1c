//! Error types for warden_core.
//!
//! Retries stay local to the component that performs them; only the final
//! outcome of an operation (success, a degraded value, or one of these
//! terminal errors) crosses the session store boundary to subscribers.

use miette::Diagnostic;
use thiserror::Error;

use crate::model::UserId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, WardenError>;

/// Errors that can occur in the session engine.
#[derive(Debug, Error, Diagnostic)]
pub enum WardenError {
    /// Network failure or 5xx from the identity provider.
    #[error("Identity provider unavailable during {operation}: {details}")]
    #[diagnostic(
        code(warden_core::provider_unavailable),
        help("The provider is retried internally; this surfaces only once retries are exhausted")
    )]
    ProviderUnavailable { operation: String, details: String },

    /// Rejected credentials. Fatal only to the specific sign-in call; an
    /// existing session is not disturbed.
    #[error("Invalid credentials")]
    #[diagnostic(code(warden_core::invalid_credentials))]
    InvalidCredentials,

    /// Profile could not be fetched or created in time. Non-fatal: a
    /// synthesized fallback profile stands in for the real one.
    #[error("Profile reconciliation for {user_id} gave up after {attempts} attempts")]
    #[diagnostic(
        code(warden_core::profile_timeout),
        help("The session stays authenticated with a fallback profile; the repository is retried on the next reconciliation")
    )]
    ProfileTimeout { user_id: UserId, attempts: u32 },

    /// Initialization did not settle before the safety timeout.
    #[error("Initialization timed out")]
    #[diagnostic(code(warden_core::initialization_timeout))]
    InitializationTimeout,

    /// A mutating action was issued while another was still in flight.
    /// Actions are serialized, not queued.
    #[error("Another {action} action is already in flight")]
    #[diagnostic(
        code(warden_core::busy),
        help("Wait for the in-flight action to settle and retry")
    )]
    Busy { action: &'static str },

    /// A privilege override request failed local policy checks.
    #[error("Admin override rejected: {reason}")]
    #[diagnostic(code(warden_core::override_rejected))]
    OverrideRejected { reason: String },

    /// Storage layer failure.
    #[error("Store error: {0}")]
    #[diagnostic(code(warden_core::store))]
    Store(#[from] warden_store::StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(warden_core::serde))]
    Serde(#[from] serde_json::Error),

    /// Configuration file error.
    #[error("Config error: {0}")]
    #[diagnostic(code(warden_core::config))]
    Config(String),

    /// The engine task has shut down and can no longer accept work.
    #[error("Session engine is closed")]
    #[diagnostic(code(warden_core::closed))]
    Closed,
}

impl WardenError {
    /// Whether a retry policy may re-attempt the failed operation.
    ///
    /// Credential and policy failures are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WardenError::ProviderUnavailable { .. } | WardenError::Store(_)
        )
    }

    pub(crate) fn provider_unavailable(
        operation: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        WardenError::ProviderUnavailable {
            operation: operation.into(),
            details: details.into(),
        }
    }
}
