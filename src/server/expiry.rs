//! One-shot delayed deletes for keys written with a TTL.
//!
//! Each TTL-bearing SET spawns a timer task. When the timer elapses the key
//! is deleted from storage; on shutdown the timer is dropped and the delete
//! never happens. Pending timers are not persisted, so a restart forgets them.
//!
//! Every write to a key goes through [`ExpiryScheduler::write`], which holds
//! the pending map for the storage call and the timer bookkeeping together.
//! A later write therefore always supersedes the timer of an earlier one: the
//! stale task is aborted and, should it already be past its sleep, its token
//! no longer matches and it leaves the key alone.

use log::{debug, error};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use super::shutdown_signalled;
use crate::store::{Storage, StoreError};

struct PendingExpiry {
    token: u64,
    task: AbortHandle,
}

type PendingMap = HashMap<String, PendingExpiry>;

#[derive(Clone)]
pub struct ExpiryScheduler {
    store: Arc<dyn Storage>,
    pending: Arc<Mutex<PendingMap>>,
    next_token: Arc<AtomicU64>,
    shutdown: watch::Receiver<bool>,
}

impl ExpiryScheduler {
    pub fn new(store: Arc<dyn Storage>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    /// Apply a write to `key` and update its expiry in one step.
    ///
    /// `apply` performs the storage call. If it succeeds, any pending timer
    /// for `key` is cancelled and, when `ttl` is set, a new one is armed and
    /// its handle returned. If it fails, the pending timer is left as it was.
    ///
    /// Must be called from within a Tokio runtime when `ttl` is set.
    pub fn write<F>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: F,
    ) -> Result<Option<JoinHandle<()>>, StoreError>
    where
        F: FnOnce() -> Result<(), StoreError>,
    {
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        apply()?;

        if let Some(previous) = map.remove(key) {
            previous.task.abort();
            debug!("Cancelled pending expiry of key {}", key);
        }

        let Some(ttl) = ttl else {
            return Ok(None);
        };
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let handle = self.arm(key.to_string(), ttl, token);
        map.insert(
            key.to_string(),
            PendingExpiry {
                token,
                task: handle.abort_handle(),
            },
        );
        Ok(Some(handle))
    }

    // The caller holds the pending map, so the task cannot look itself up
    // before it has been recorded.
    fn arm(&self, key: String, ttl: Duration, token: u64) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.clone();
        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ttl) => {}
                _ = shutdown_signalled(&mut shutdown) => {
                    debug!("Skipping expiry of key {} on shutdown", key);
                    return;
                }
            }
            expire(store.as_ref(), &pending, &key, token);
        })
    }

    /// Number of timers still waiting to fire.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// Writes hold the same lock, so none can land between the token check and
// the delete.
fn expire(store: &dyn Storage, pending: &Mutex<PendingMap>, key: &str, token: u64) {
    let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
    match map.get(key) {
        Some(entry) if entry.token == token => {
            map.remove(key);
        }
        _ => return,
    }

    match store.delete(key) {
        Ok(()) => debug!("Expired key {}", key),
        Err(StoreError::NotFound(_)) => debug!("Key {} already gone at expiry", key),
        Err(e) => error!("Failed to expire key {}: {}", key, e),
    }
}
