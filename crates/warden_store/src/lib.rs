//! Warden Store - namespaced key-value storage for Warden.
//!
//! This crate provides the storage seam the session engine persists through:
//! - [`KvStore`]: the injectable, namespaced key-value contract
//! - [`SledStore`]: durable storage backed by sled
//! - [`MemoryStore`]: in-process storage for tests and volatile stores
//!
//! # Architecture
//!
//! Every store instance is owned by whoever constructed it and has an
//! explicit `close()`; there are no process-wide singletons. Namespaces keep
//! independent consumers (recovery snapshots, override records) from
//! colliding on ad hoc string keys.

pub mod error;
pub mod kv;
pub mod memory;
pub mod sled_store;

pub use error::{StoreError, StoreResult};
pub use kv::KvStore;
pub use memory::MemoryStore;
pub use sled_store::SledStore;
