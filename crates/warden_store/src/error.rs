//! Error types for warden_store.

use miette::Diagnostic;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Error from the sled backend.
    #[error("Storage backend error: {0}")]
    #[diagnostic(code(warden_store::backend))]
    Backend(#[from] sled::Error),

    /// IO error.
    #[error("IO error: {0}")]
    #[diagnostic(code(warden_store::io))]
    Io(#[from] std::io::Error),

    /// Operation issued after `close()`.
    #[error("Store is closed")]
    #[diagnostic(
        code(warden_store::closed),
        help("Stores are single-lifecycle; construct a new one instead of reusing a closed handle")
    )]
    Closed,
}
