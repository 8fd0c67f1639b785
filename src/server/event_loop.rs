//! # Session Registry and Event Loop
//!
//! The event loop is the only writer of the session registry. Everything else
//! (the accept loop, connection readers, observers) talks to it through
//! bounded queues:
//!
//! - **register** - admit a new client and start its reader
//! - **unregister** - remove a client; a second unregister is a no-op
//! - **request** - hand a frame to a freshly spawned dispatcher task
//! - **query** - report the number of live clients
//!
//! Events are handled one at a time, so registry mutations never race. No
//! ordering is promised between requests of different clients, and replies to
//! one client's pipelined requests may come back out of order because each
//! request is dispatched as its own task.

use log::{debug, info, warn};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};

use super::client::{Client, ClientId, Connection, Request};
use super::dispatcher::Dispatcher;
use super::reader::ConnectionReader;
use super::shutdown_signalled;

/// The event loop has stopped and no longer accepts events.
#[derive(Debug, Error)]
#[error("event loop is not running")]
pub struct EventLoopClosed;

/// Live clients, keyed by handle id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    clients: HashMap<ClientId, Arc<Client>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the client was already present.
    pub fn admit(&mut self, client: Arc<Client>) -> bool {
        match self.clients.entry(client.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(client);
                true
            }
        }
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Sending side of the event queues. Cheap to clone.
#[derive(Clone)]
pub struct EventHandle {
    register: mpsc::Sender<Connection>,
    unregister: mpsc::Sender<Arc<Client>>,
    requests: mpsc::Sender<Request>,
    queries: mpsc::Sender<oneshot::Sender<usize>>,
}

/// Receiving side of the event queues, owned by the event loop.
pub(crate) struct EventQueues {
    pub(crate) register: mpsc::Receiver<Connection>,
    pub(crate) unregister: mpsc::Receiver<Arc<Client>>,
    pub(crate) requests: mpsc::Receiver<Request>,
    pub(crate) queries: mpsc::Receiver<oneshot::Sender<usize>>,
}

impl EventHandle {
    pub(crate) fn channel(capacity: usize) -> (EventHandle, EventQueues) {
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);
        (
            EventHandle {
                register: register_tx,
                unregister: unregister_tx,
                requests: request_tx,
                queries: query_tx,
            },
            EventQueues {
                register: register_rx,
                unregister: unregister_rx,
                requests: request_rx,
                queries: query_rx,
            },
        )
    }

    pub async fn register(&self, connection: Connection) -> Result<(), EventLoopClosed> {
        self.register.send(connection).await.map_err(|_| EventLoopClosed)
    }

    pub async fn unregister(&self, client: Arc<Client>) -> Result<(), EventLoopClosed> {
        self.unregister.send(client).await.map_err(|_| EventLoopClosed)
    }

    pub async fn request_ready(&self, request: Request) -> Result<(), EventLoopClosed> {
        self.requests.send(request).await.map_err(|_| EventLoopClosed)
    }

    /// Number of registered clients, answered by the event loop itself.
    pub async fn client_count(&self) -> Result<usize, EventLoopClosed> {
        let (tx, rx) = oneshot::channel();
        self.queries.send(tx).await.map_err(|_| EventLoopClosed)?;
        rx.await.map_err(|_| EventLoopClosed)
    }
}

enum Event {
    Register(Connection),
    Unregister(Arc<Client>),
    Request(Request),
    Query(oneshot::Sender<usize>),
}

/// Tuning knobs the event loop needs from the server configuration.
#[derive(Debug, Clone)]
pub struct EventLoopOptions {
    pub queue_capacity: usize,
    pub max_inflight_requests: usize,
    pub revoke_auth_on_disconnect: bool,
}

pub struct EventLoop {
    registry: SessionRegistry,
    queues: EventQueues,
    handle: EventHandle,
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
    revoke_auth: bool,
    shutdown: watch::Receiver<bool>,
}

impl EventLoop {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        options: EventLoopOptions,
        shutdown: watch::Receiver<bool>,
    ) -> (EventLoop, EventHandle) {
        let (handle, queues) = EventHandle::channel(options.queue_capacity);
        let event_loop = EventLoop {
            registry: SessionRegistry::new(),
            queues,
            handle: handle.clone(),
            dispatcher,
            permits: Arc::new(Semaphore::new(options.max_inflight_requests)),
            revoke_auth: options.revoke_auth_on_disconnect,
            shutdown,
        };
        (event_loop, handle)
    }

    /// Process events until shutdown is signalled. Returns the registry as it
    /// stood when the loop stopped.
    pub async fn run(mut self) -> SessionRegistry {
        loop {
            let event = tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown) => break,
                Some(connection) = self.queues.register.recv() => Event::Register(connection),
                Some(client) = self.queues.unregister.recv() => Event::Unregister(client),
                Some(request) = self.queues.requests.recv() => Event::Request(request),
                Some(reply_to) = self.queues.queries.recv() => Event::Query(reply_to),
                else => break,
            };

            match event {
                Event::Register(connection) => self.on_register(connection),
                Event::Unregister(client) => self.on_unregister(client),
                Event::Request(request) => self.on_request(request),
                Event::Query(reply_to) => {
                    let _ = reply_to.send(self.registry.len());
                }
            }
        }

        info!("Event loop stopped with {} client(s) connected", self.registry.len());
        self.registry
    }

    fn on_register(&mut self, connection: Connection) {
        let Connection { client, reader } = connection;

        if !self.registry.admit(Arc::clone(&client)) {
            warn!("Client {} is already registered", client.identity());
            return;
        }
        info!("New client connected {}", client.identity());

        let reader = ConnectionReader::new(
            reader,
            client,
            self.handle.clone(),
            Arc::clone(&self.permits),
            self.shutdown.clone(),
        );
        tokio::spawn(reader.run());
    }

    fn on_unregister(&mut self, client: Arc<Client>) {
        if self.registry.remove(client.id()).is_none() {
            return;
        }
        info!("Client {} disconnected", client.identity());

        if self.revoke_auth && self.dispatcher.auth_enabled() {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move { dispatcher.revoke_auth(client.identity()) });
        }
    }

    fn on_request(&self, request: Request) {
        debug!(
            "Received {:?} from {}",
            String::from_utf8_lossy(request.payload()).trim_end(),
            request.client().identity()
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(request).await });
    }
}
