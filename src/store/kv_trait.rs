//! # Storage Capability
//!
//! This module defines the interface the server core uses to reach the
//! key-value backend. The core never assumes anything about how values are
//! kept: every read, write, delete and authorization marker goes through
//! this trait.
//!
//! ## Implementations
//!
//! - `RwLockEngine`: Thread-safe in-memory storage using RwLock<HashMap>
//! - `SledEngine`: Persistent storage using the sled embedded database

use thiserror::Error;

/// Errors a storage backend can report.
///
/// The dispatcher collapses every variant into a generic `ERROR` reply, so
/// the distinction only matters for logging.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no value in the store.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The backend itself failed (I/O, corruption, encoding).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Common interface for all key-value storage engines.
///
/// All engines must be safe to share across tasks (Send + Sync); the server
/// holds one engine behind an `Arc` and calls it from many dispatcher and
/// expiry tasks at once.
#[cfg_attr(test, mockall::automock)]
pub trait Storage: Send + Sync {
    /// Retrieve a value by its key.
    ///
    /// # Returns
    /// * `Err(StoreError::NotFound)` if the key has no value
    fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Store a key-value pair, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a key.
    ///
    /// # Returns
    /// * `Err(StoreError::NotFound)` if the key did not exist
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Persist an authorization marker for `identity`.
    ///
    /// The marker must be readable afterwards through [`Storage::get`] with
    /// `identity` as the key, holding exactly `secret`.
    fn auth(&self, identity: &str, secret: &str) -> Result<(), StoreError>;

    /// Make every acknowledged write durable. Engines without persistence
    /// have nothing to do.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
