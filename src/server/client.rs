//! Client handles and the requests they produce.

use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit};

use crate::protocol::{Command, ProtocolError, Reply};

/// Process-unique handle number; identities (peer addresses) may repeat over time.
pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// One accepted connection.
///
/// The client owns the write half of its transport. Every reply is written
/// with a single `write_all` under the writer lock, so concurrent dispatchers
/// replying to the same client never interleave inside a reply.
pub struct Client {
    id: ClientId,
    identity: String,
    writer: Mutex<BoxedWriter>,
}

impl Client {
    pub fn new<W>(identity: impl Into<String>, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            identity: identity.into(),
            writer: Mutex::new(Box::new(writer)),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Remote peer address; also the subject key of the auth marker.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Write one reply as a single buffer.
    pub async fn write_reply(&self, reply: &Reply) -> std::io::Result<()> {
        let bytes = reply.to_bytes();
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await
    }

    /// Shut the write side down. Errors are logged and otherwise ignored,
    /// the peer is usually already gone when this runs.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Error when closing client {}: {}", self.identity, e);
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish()
    }
}

/// A freshly accepted client together with the read half of its transport,
/// handed to the event loop for admission.
pub struct Connection {
    pub(crate) client: Arc<Client>,
    pub(crate) reader: BoxedReader,
}

impl Connection {
    pub fn new<R, W>(identity: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            client: Client::new(identity, writer),
            reader: Box::new(reader),
        }
    }

    /// Split an accepted socket; the identity is the peer address.
    pub fn from_tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(peer.to_string(), reader, writer)
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

/// One newline-delimited frame read from a client.
///
/// The request holds a dispatch permit for as long as it lives, which is
/// what bounds the number of dispatcher tasks in flight.
pub struct Request {
    client: Arc<Client>,
    payload: Vec<u8>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Request {
    pub fn new(client: Arc<Client>, payload: Vec<u8>, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            client,
            payload,
            _permit: permit,
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Raw frame bytes, terminator included.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Structural validation of the frame.
    pub fn command(&self) -> Result<Command, ProtocolError> {
        Command::parse(&self.payload)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("client", &self.client.identity)
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .finish()
    }
}
