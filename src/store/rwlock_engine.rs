//! # Thread-Safe In-Memory Storage Engine
//!
//! This module provides a thread-safe in-memory storage engine using RwLock<HashMap>.
//! Implements the `Storage` interface so the server can use it interchangeably
//! with the persistent engine.
//!
//! ## Thread Safety Implementation
//!
//! - **Multiple concurrent readers**: GET and auth lookups share a read lock
//! - **Single writer**: SET, DEL and AUTH take the write lock
//!
//! **Note**: This implementation is not persistent! All data, including
//! authorization markers, is lost when the process terminates.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::kv_trait::{Storage, StoreError};

/// Thread-safe in-memory key-value storage engine.
///
/// Cloning the engine is cheap and yields a handle onto the same data.
#[derive(Clone, Default)]
pub struct RwLockEngine {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl RwLockEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, authorization markers included.
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for RwLockEngine {
    fn get(&self, key: &str) -> Result<String, StoreError> {
        // Shared read lock - readers never block each other
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        match data.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn auth(&self, identity: &str, secret: &str) -> Result<(), StoreError> {
        // The marker lives in the same keyspace so `get(identity)` reads it back
        self.set(identity, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_get_delete() {
        let engine = RwLockEngine::new();

        engine.set("foo", "bar").unwrap();
        assert_eq!(engine.get("foo").unwrap(), "bar");

        engine.set("foo", "baz").unwrap();
        assert_eq!(engine.get("foo").unwrap(), "baz");

        engine.delete("foo").unwrap();
        assert!(matches!(engine.get("foo"), Err(StoreError::NotFound(_))));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_delete_missing_key() {
        let engine = RwLockEngine::new();
        assert!(matches!(engine.delete("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_auth_marker_is_readable() {
        let engine = RwLockEngine::new();
        engine.auth("127.0.0.1:50000", "secret123").unwrap();
        assert_eq!(engine.get("127.0.0.1:50000").unwrap(), "secret123");
    }

    #[test]
    fn test_concurrent_writers() {
        let engine = RwLockEngine::new();
        let mut handles = vec![];

        for t in 0..8 {
            let engine = engine.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    engine
                        .set(&format!("t{}:k{}", t, i), &i.to_string())
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 800);
        assert_eq!(engine.get("t3:k42").unwrap(), "42");
    }
}
