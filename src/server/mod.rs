//! # TCP Server Implementation
//!
//! This module wires the listener to the connection core.
//!
//! ## Architecture
//!
//! ```text
//! accept loop ──register──▶ event loop ──spawn──▶ connection reader (per client)
//!                               ▲                        │
//!                               └──request / unregister──┘
//!                               │
//!                               └──spawn──▶ dispatcher (per request) ──▶ storage
//!                                                 │
//!                                                 └──spawn──▶ expiry timer (per TTL SET)
//! ```
//!
//! ## Shutdown
//!
//! A single `watch` channel carries the shutdown signal. When it fires the
//! accept loop stops, readers close their sockets, pending expiry deletes are
//! skipped and the event loop exits. In-flight dispatches are not drained.

pub mod client;
pub mod dispatcher;
pub mod event_loop;
pub mod expiry;
pub mod reader;

use anyhow::{anyhow, Result};
use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpListener};
use tokio::sync::watch;

use crate::config::Config;
use crate::store::Storage;

pub use client::{Client, ClientId, Connection, Request};
pub use dispatcher::Dispatcher;
pub use event_loop::{EventHandle, EventLoop, EventLoopClosed, EventLoopOptions, SessionRegistry};
pub use expiry::ExpiryScheduler;
pub use reader::{ReaderExit, MAX_FRAME_LEN};

/// Resolves once shutdown has been signalled, or once the signalling side is gone.
pub(crate) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// TCP server for handling client connections.
pub struct Server {
    config: Config,
    store: Arc<dyn Storage>,
}

impl Server {
    /// Create a new server instance.
    ///
    /// # Arguments
    /// * `config` - Server configuration (address, port, secret, limits)
    /// * `store` - Storage engine shared by every dispatcher and expiry task
    pub fn new(config: Config, store: Arc<dyn Storage>) -> Self {
        Self { config, store }
    }

    /// Bind the listening socket, honouring the configured network family.
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = self.config.bind_address();
        let network = self.config.network.as_str();

        let addr = lookup_host(&address)
            .await?
            .find(|addr| match network {
                "tcp4" => addr.is_ipv4(),
                "tcp6" => addr.is_ipv6(),
                _ => true,
            })
            .ok_or_else(|| anyhow!("no {} address found for {}", network, address))?;

        let listener = TcpListener::bind(addr).await?;
        info!("kece server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until SIGINT or SIGTERM.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be bound or the accept loop fails.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// The listener is closed when this returns, whatever the outcome.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let expiry = ExpiryScheduler::new(Arc::clone(&self.store), shutdown_rx.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.store),
            self.config.secret().map(str::to_string),
            expiry,
        ));
        if dispatcher.auth_enabled() {
            info!("Authentication enabled");
        }

        let options = EventLoopOptions {
            queue_capacity: self.config.event_queue_capacity,
            max_inflight_requests: self.config.max_inflight_requests,
            revoke_auth_on_disconnect: self.config.revoke_auth_on_disconnect,
        };
        let (event_loop, events) = EventLoop::new(dispatcher, options, shutdown_rx);
        let event_loop = tokio::spawn(event_loop.run());

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if events.register(Connection::from_tcp(stream, peer)).await.is_err() {
                            break Err(anyhow!("event loop stopped unexpectedly"));
                        }
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break Err(e.into());
                    }
                },
            }
        };

        let _ = shutdown_tx.send(true);
        drop(listener);
        if let Err(e) = event_loop.await {
            error!("Event loop task failed: {}", e);
        }
        if let Err(e) = self.store.flush() {
            error!("Failed to flush storage on shutdown: {}", e);
        }
        info!("Server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv_trait::MockStorage;

    #[tokio::test]
    async fn test_serve_flushes_storage_on_shutdown() {
        let mut mock = MockStorage::new();
        mock.expect_flush().times(1).returning(|| Ok(()));

        let config = Config {
            port: 0,
            ..Config::default()
        };
        let server = Server::new(config, Arc::new(mock));
        let listener = server.bind().await.unwrap();

        server.serve(listener, async {}).await.unwrap();
    }
}
