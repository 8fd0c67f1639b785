//! # Storage Engine Module
//!
//! This module contains the storage components behind the server:
//!
//! - **`kv_trait`**: The `Storage` capability every engine implements
//! - **`rwlock_engine`**: Thread-safe in-memory storage using RwLock<HashMap>
//! - **`sled_engine`**: Persistent storage on top of sled
//!
//! The server core only talks to `dyn Storage`, so engines can be swapped
//! through configuration without touching the request path.

pub mod kv_trait;
pub mod rwlock_engine;
pub mod sled_engine;

use std::sync::Arc;

use crate::config::Config;

pub use kv_trait::{Storage, StoreError};
pub use rwlock_engine::RwLockEngine;
pub use sled_engine::SledEngine;

/// Build the storage engine named by `config.engine`.
///
/// # Errors
/// Returns an error for an unknown engine name or if the sled database
/// cannot be opened at `config.storage_path`.
pub fn open(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    match config.engine.as_str() {
        "rwlock" => Ok(Arc::new(RwLockEngine::new())),
        "sled" => Ok(Arc::new(SledEngine::new(&config.storage_path)?)),
        other => Err(anyhow::anyhow!(
            "unknown engine type '{}' (available: rwlock, sled)",
            other
        )),
    }
}
