//! # Command Dispatcher
//!
//! Executes one request against the storage capability and writes exactly one
//! reply. Each request walks the same path and stops at the first terminal
//! step:
//!
//! 1. **validate** - parse the frame; malformed input is answered with the
//!    parse error and never reaches storage
//! 2. **authorize** - when a shared secret is configured, SET/GET/DEL require
//!    the client's stored auth marker to equal the secret
//! 3. **execute** - run the storage call; backend failures collapse to `ERROR`
//! 4. **reply** - one buffer, one write
//!
//! The dispatcher keeps no per-client state. Whether a connection has
//! authenticated lives in storage, keyed by the client identity.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use super::client::Request;
use super::expiry::ExpiryScheduler;
use crate::protocol::{Command, Reply};
use crate::store::{Storage, StoreError};

pub struct Dispatcher {
    store: Arc<dyn Storage>,
    secret: Option<String>,
    expiry: ExpiryScheduler,
}

impl Dispatcher {
    /// `secret` of `None` (or an empty string) disables authentication.
    pub fn new(store: Arc<dyn Storage>, secret: Option<String>, expiry: ExpiryScheduler) -> Self {
        Self {
            store,
            secret: secret.filter(|s| !s.is_empty()),
            expiry,
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Execute `request` and write its reply to the owning client.
    pub async fn dispatch(&self, request: Request) {
        let client = request.client();
        let reply = self.execute(client.identity(), request.payload());
        if let Err(e) = client.write_reply(&reply).await {
            warn!(
                "Failed to write response to {}. Err: {}",
                client.identity(),
                e
            );
        }
    }

    /// Decide the reply for one raw frame sent by `identity`.
    ///
    /// Must run inside a Tokio runtime: a SET with a TTL spawns its expiry timer.
    pub fn execute(&self, identity: &str, frame: &[u8]) -> Reply {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                debug!("Rejected frame from {}: {}", identity, e);
                return e.into();
            }
        };

        match command {
            Command::Auth { secret } => self.authenticate(identity, &secret),
            Command::Set { key, value, expiry } => {
                self.authorized(identity, || self.set(&key, &value, expiry))
            }
            Command::Get { key } => self.authorized(identity, || self.get(&key)),
            Command::Del { key } => self.authorized(identity, || self.delete(&key)),
        }
    }

    fn authenticate(&self, identity: &str, candidate: &str) -> Reply {
        let Some(secret) = self.secret.as_deref() else {
            return Reply::Error;
        };

        if secret.as_bytes() != candidate.trim().as_bytes() {
            return Reply::InvalidAuth;
        }

        match self.store.auth(identity, secret) {
            Ok(()) => Reply::Ok,
            Err(e) => {
                warn!("Failed to persist auth marker for {}: {}", identity, e);
                Reply::Error
            }
        }
    }

    // Runs `command` only if this identity holds a marker equal to the secret.
    fn authorized(&self, identity: &str, command: impl FnOnce() -> Reply) -> Reply {
        let Some(secret) = self.secret.as_deref() else {
            return command();
        };

        match self.store.get(identity) {
            Ok(marker) if marker.as_bytes() == secret.as_bytes() => command(),
            _ => Reply::InvalidAuth,
        }
    }

    fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Reply {
        match self.expiry.write(key, expiry, || self.store.set(key, value)) {
            Ok(_) => Reply::Ok,
            Err(e) => {
                debug!("SET {} failed: {}", key, e);
                Reply::Error
            }
        }
    }

    fn get(&self, key: &str) -> Reply {
        match self.store.get(key) {
            Ok(value) => Reply::Value(value),
            Err(e) => {
                debug!("GET {} failed: {}", key, e);
                Reply::Error
            }
        }
    }

    fn delete(&self, key: &str) -> Reply {
        match self.expiry.write(key, None, || self.store.delete(key)) {
            Ok(_) => Reply::Ok,
            Err(e) => {
                debug!("DEL {} failed: {}", key, e);
                Reply::Error
            }
        }
    }

    /// Remove the auth marker of a departed client. A client that never
    /// authenticated has no marker, which is not worth a log line.
    pub fn revoke_auth(&self, identity: &str) {
        if !self.auth_enabled() {
            return;
        }
        match self.store.delete(identity) {
            Ok(()) => debug!("Revoked auth marker of {}", identity),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => warn!("Failed to revoke auth marker of {}: {}", identity, e),
        }
    }
}
