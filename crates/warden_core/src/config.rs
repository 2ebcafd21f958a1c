//! Configuration for the session engine.
//!
//! All externally tunable behavior lives here: retry/backoff shape, the
//! safety timeout, the event debounce window, and recovery-cache freshness.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::retry::RetryConfig;

/// Engine configuration.
///
/// Defaults mirror the behavior the engine was built around: 3 profile
/// attempts at 500ms doubling backoff, a 10 second safety timeout, a 1 second
/// event debounce window, and a 24 hour recovery snapshot TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Retry policy for profile reconciliation.
    pub retry: RetryConfig,

    /// Retry policy for identity provider read paths (session/user fetch,
    /// refresh). Provider retries stay internal; callers only see the final
    /// outcome.
    pub provider_retry: RetryConfig,

    /// Upper bound on total initialization latency in milliseconds. When it
    /// fires the engine forces a terminal decision from the recovery cache.
    pub safety_timeout_ms: u64,

    /// Window in milliseconds within which repeated sign-in/refresh events
    /// collapse into at most one reconciliation.
    pub debounce_window_ms: u64,

    /// Maximum age in hours for a recovery snapshot to be trusted. `None`
    /// accepts snapshots of any age.
    pub cache_ttl_hours: Option<u64>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            provider_retry: RetryConfig::default(),
            safety_timeout_ms: 10_000,
            debounce_window_ms: 1_000,
            cache_ttl_hours: Some(24),
        }
    }
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WardenError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&contents).map_err(|e| {
            WardenError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded warden config from {}", path.display());
        Ok(config)
    }

    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_hours
            .map(|hours| Duration::from_secs(hours * 3600))
    }
}
