//! The transport-agnostic connection contract.
//!
//! A [`Connection`] is the server's handle on one client. It exposes a
//! reliable, ordered management path and a best-effort update path. Received
//! frames and the disconnect notification flow the other way, as
//! [`ConnectionEvent`]s handed to an [`EventSink`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use ghostnet_proto::{DecodeError, Frame};
use tokio::sync::mpsc;

/// Which channel a frame travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Reliable, ordered stream.
    Management,
    /// Connectionless datagrams.
    Update,
}

/// Errors raised when sending on a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection has been closed or has disconnected.
    #[error("connection closed")]
    Closed,

    /// No update endpoint is bound to this connection yet.
    #[error("no update path bound")]
    NoUpdatePath,

    /// The outgoing queue is full because the peer stopped reading.
    #[error("outgoing queue full, peer is not reading")]
    Backlogged,

    /// The encoded frame exceeds what the channel can carry.
    #[error("encoded frame of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Channel limit.
        max: usize,
    },

    /// A received payload did not decode.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that happened on a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A frame arrived on the management path of `endpoint`.
    Management { endpoint: SocketAddr, frame: Frame },
    /// A frame arrived on the update channel from `source`.
    Update { source: SocketAddr, frame: Frame },
    /// The management path of `endpoint` closed. Delivered at most once.
    Disconnected { endpoint: SocketAddr },
}

/// Receiver of [`ConnectionEvent`]s, shared by every task of a connection.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(ConnectionEvent) + Send + Sync>,
}

impl EventSink {
    /// Wraps a callback.
    pub fn new(deliver: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Forwards events into a channel, converting them on the way.
    ///
    /// Events sent after the receiver is gone are dropped.
    pub fn channel<E>(tx: mpsc::UnboundedSender<E>) -> Self
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        Self::new(move |event| {
            let _ = tx.send(E::from(event));
        })
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn deliver(&self, event: ConnectionEvent) {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// The server's handle on one client.
///
/// Sends never block: they enqueue or hand the frame off and report only
/// failures known at call time. Any failure means the peer should be
/// treated as gone.
pub trait Connection: Send + Sync + fmt::Debug {
    /// Address of the management path. Unique among live connections.
    fn management_endpoint(&self) -> SocketAddr;

    /// Address update datagrams for this client are sent to, once known.
    fn update_endpoint(&self) -> Option<SocketAddr>;

    /// Associates the update path with `endpoint`.
    fn bind_update(&self, endpoint: SocketAddr);

    /// Drops the update association, returning the endpoint it had.
    fn unbind_update(&self) -> Option<SocketAddr>;

    /// Sends a frame on the reliable, ordered path.
    fn send_management(&self, frame: &Frame) -> Result<(), ConnectionError>;

    /// Sends a frame on the best-effort path.
    fn send_update(&self, frame: &Frame) -> Result<(), ConnectionError>;

    /// Closes both paths. Delivers [`ConnectionEvent::Disconnected`] if it
    /// has not been delivered yet.
    fn close(&self);
}
