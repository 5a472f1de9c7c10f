//! In-process loopback connections.
//!
//! Used when the server and a client live in the same process, and by the
//! server's own tests. Frames still pass through the codec in the proper
//! direction, so a local client sees exactly what a remote one would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ghostnet_proto::{Direction, Frame};
use tokio::sync::mpsc;

use crate::connection::{Channel, Connection, ConnectionError, ConnectionEvent, EventSink};

fn relay(frame: &Frame, direction: Direction) -> Result<Frame, ConnectionError> {
    Ok(Frame::decode(&frame.encode(direction), direction)?)
}

/// Server-side half of a loopback connection.
#[derive(Debug)]
pub struct LocalConnection {
    endpoint: SocketAddr,
    update: Mutex<Option<SocketAddr>>,
    inbox: mpsc::UnboundedSender<(Channel, Frame)>,
    closed: AtomicBool,
    sink: EventSink,
}

impl LocalConnection {
    /// Creates a connected pair whose update path is already bound to
    /// `endpoint`.
    pub fn pair(endpoint: SocketAddr, sink: EventSink) -> (Arc<LocalConnection>, LocalClient) {
        Self::build(endpoint, Some(endpoint), sink)
    }

    /// Creates a connected pair whose update path still has to be bound,
    /// like a remote client before its first datagram.
    pub fn pair_unbound(
        endpoint: SocketAddr,
        sink: EventSink,
    ) -> (Arc<LocalConnection>, LocalClient) {
        Self::build(endpoint, None, sink)
    }

    fn build(
        endpoint: SocketAddr,
        update: Option<SocketAddr>,
        sink: EventSink,
    ) -> (Arc<LocalConnection>, LocalClient) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(LocalConnection {
            endpoint,
            update: Mutex::new(update),
            inbox: tx,
            closed: AtomicBool::new(false),
            sink: sink.clone(),
        });
        let client = LocalClient {
            conn: Arc::clone(&conn),
            inbox: rx,
            sink,
        };
        (conn, client)
    }

    fn deliver(&self, channel: Channel, frame: &Frame) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        let frame = relay(frame, Direction::ServerToClient)?;
        self.inbox
            .send((channel, frame))
            .map_err(|_| ConnectionError::Closed)
    }
}

impl Connection for LocalConnection {
    fn management_endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn update_endpoint(&self) -> Option<SocketAddr> {
        *self.update.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bind_update(&self, endpoint: SocketAddr) {
        *self.update.lock().unwrap_or_else(|e| e.into_inner()) = Some(endpoint);
    }

    fn unbind_update(&self) -> Option<SocketAddr> {
        self.update.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn send_management(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.deliver(Channel::Management, frame)
    }

    fn send_update(&self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.update_endpoint().is_none() {
            return Err(ConnectionError::NoUpdatePath);
        }
        self.deliver(Channel::Update, frame)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.unbind_update();
        self.sink.deliver(ConnectionEvent::Disconnected {
            endpoint: self.endpoint,
        });
    }
}

/// Client-side half of a loopback connection.
#[derive(Debug)]
pub struct LocalClient {
    conn: Arc<LocalConnection>,
    inbox: mpsc::UnboundedReceiver<(Channel, Frame)>,
    sink: EventSink,
}

impl LocalClient {
    pub fn endpoint(&self) -> SocketAddr {
        self.conn.endpoint
    }

    /// Sends a frame to the server's management handler.
    pub fn send_management(&self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.conn.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        let frame = relay(frame, Direction::ClientToServer)?;
        self.sink.deliver(ConnectionEvent::Management {
            endpoint: self.conn.endpoint,
            frame,
        });
        Ok(())
    }

    /// Sends a frame to the server's update handler from this client's endpoint.
    pub fn send_update(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.send_update_from(self.conn.endpoint, frame)
    }

    /// Sends an update as if it came from `source`.
    pub fn send_update_from(
        &self,
        source: SocketAddr,
        frame: &Frame,
    ) -> Result<(), ConnectionError> {
        if self.conn.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        let frame = relay(frame, Direction::ClientToServer)?;
        self.sink.deliver(ConnectionEvent::Update { source, frame });
        Ok(())
    }

    /// Next frame from the server, if one is waiting.
    pub fn try_recv(&mut self) -> Option<(Channel, Frame)> {
        self.inbox.try_recv().ok()
    }

    /// Every frame currently waiting.
    pub fn drain(&mut self) -> Vec<(Channel, Frame)> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Waits for the next frame. `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<(Channel, Frame)> {
        self.inbox.recv().await
    }

    /// Closes the connection from the client side.
    pub fn disconnect(&self) {
        self.conn.close();
    }
}
