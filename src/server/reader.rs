//! # Connection Reader
//!
//! One reader task runs per admitted client. It splits the inbound byte
//! stream on `\n` and forwards every frame to the event loop as a
//! [`Request`]. The reader never touches the session registry itself.
//!
//! Every exit path is an error of some kind (EOF, a broken socket, an
//! oversized frame, shutdown) and ends the same way: the client's transport
//! is closed and an unregister event is emitted.

use log::{debug, info};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{watch, Semaphore};

use super::client::{Client, Request};
use super::event_loop::EventHandle;
use super::shutdown_signalled;

/// Longest frame accepted, terminator included.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Why a reader stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// The peer closed the connection between frames
    Closed,
    /// The peer closed the connection in the middle of a frame
    Truncated(usize),
    /// A frame grew past [`MAX_FRAME_LEN`] without a delimiter
    FrameTooLong,
    Io(io::Error),
    Shutdown,
    /// The event loop is gone and can no longer take requests
    Detached,
}

impl fmt::Display for ReaderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderExit::Closed => write!(f, "connection closed by peer"),
            ReaderExit::Truncated(n) => write!(f, "peer closed mid-frame ({} bytes dropped)", n),
            ReaderExit::FrameTooLong => write!(f, "frame exceeds {} bytes", MAX_FRAME_LEN),
            ReaderExit::Io(e) => write!(f, "read error: {}", e),
            ReaderExit::Shutdown => write!(f, "server shutting down"),
            ReaderExit::Detached => write!(f, "event loop stopped"),
        }
    }
}

pub(crate) struct ConnectionReader<R> {
    reader: BufReader<R>,
    client: Arc<Client>,
    events: EventHandle,
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

impl<R> ConnectionReader<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(
        reader: R,
        client: Arc<Client>,
        events: EventHandle,
        permits: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            client,
            events,
            permits,
            shutdown,
        }
    }

    /// Read until the connection ends, then close it and unregister.
    pub(crate) async fn run(mut self) -> ReaderExit {
        let exit = self.read_frames().await;

        match &exit {
            ReaderExit::Closed | ReaderExit::Shutdown | ReaderExit::Detached => {
                debug!("Reader for {} stopped: {}", self.client.identity(), exit)
            }
            ReaderExit::Io(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!("Connection reset by {}", self.client.identity())
            }
            _ => info!("Dropping client {}: {}", self.client.identity(), exit),
        }

        self.client.close().await;
        if self.events.unregister(Arc::clone(&self.client)).await.is_err() {
            debug!("Event loop gone before {} could unregister", self.client.identity());
        }
        exit
    }

    async fn read_frames(&mut self) -> ReaderExit {
        loop {
            let mut frame = Vec::new();
            let mut limited = (&mut self.reader).take(MAX_FRAME_LEN as u64);
            let read = tokio::select! {
                read = limited.read_until(b'\n', &mut frame) => read,
                _ = shutdown_signalled(&mut self.shutdown) => return ReaderExit::Shutdown,
            };

            match read {
                Ok(0) => return ReaderExit::Closed,
                Ok(_) if frame.last() == Some(&b'\n') => {}
                Ok(n) if n >= MAX_FRAME_LEN => return ReaderExit::FrameTooLong,
                Ok(n) => return ReaderExit::Truncated(n),
                Err(e) => return ReaderExit::Io(e),
            }

            // One permit per in-flight request; waiting here back-pressures
            // this client's socket instead of the event loop.
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return ReaderExit::Detached,
                },
                _ = shutdown_signalled(&mut self.shutdown) => return ReaderExit::Shutdown,
            };

            let request = Request::new(Arc::clone(&self.client), frame, Some(permit));
            if self.events.request_ready(request).await.is_err() {
                return ReaderExit::Detached;
            }
        }
    }
}
