//! The shared update channel.
//!
//! One UDP socket carries the position updates of every client. Each
//! datagram holds exactly one encoded frame with no extra framing; there is
//! no fragmentation and no retransmission. Incoming datagrams are
//! demultiplexed by the server using their source address.
//!
//! Sends are queued for a writer task that waits for the socket to become
//! writable, so callers never block and a fresh socket does not lose its
//! first datagrams.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use ghostnet_proto::{Direction, Frame};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionError, ConnectionEvent, EventSink};

/// Largest payload a single datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Datagrams that may wait for the socket before new ones are dropped.
pub const UPDATE_QUEUE_CAPACITY: usize = 1024;

/// A UDP socket shared by every connection's update path.
#[derive(Debug, Clone)]
pub struct UpdateSocket {
    socket: Arc<UdpSocket>,
    outbox: mpsc::Sender<(Bytes, SocketAddr)>,
    outgoing: Direction,
}

impl UpdateSocket {
    /// Binds the server's update socket.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        Self::bind_as(addr, Direction::ServerToClient).await
    }

    /// Binds a socket that sends frames in `outgoing` direction.
    pub async fn bind_as(addr: SocketAddr, outgoing: Direction) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, outgoing))
    }

    /// Wraps an already bound socket and starts its writer task.
    ///
    /// Must be called from within a tokio runtime. The writer stops once
    /// every clone of the returned handle is dropped.
    pub fn from_socket(socket: UdpSocket, outgoing: Direction) -> Self {
        let socket = Arc::new(socket);
        let (outbox, queue) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        tokio::spawn(send_loop(Arc::clone(&socket), queue));
        Self {
            socket,
            outbox,
            outgoing,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn incoming(&self) -> Direction {
        match self.outgoing {
            Direction::ServerToClient => Direction::ClientToServer,
            Direction::ClientToServer => Direction::ServerToClient,
        }
    }

    /// Queues one frame for `target` without waiting.
    ///
    /// When the queue is full the datagram is dropped, which the update
    /// channel allows.
    pub fn send_to(&self, frame: &Frame, target: SocketAddr) -> Result<(), ConnectionError> {
        let payload = frame.encode(self.outgoing);
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(ConnectionError::TooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        match self.outbox.try_send((payload, target)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Update queue full, dropping datagram to {target}");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionError::Closed),
        }
    }

    /// Spawns the receive loop. Every datagram that decodes is delivered as
    /// [`ConnectionEvent::Update`]; the rest are logged and dropped.
    ///
    /// The loop exits when `shutdown_rx` flips to `true`.
    pub fn spawn_receiver(
        &self,
        sink: EventSink,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let direction = self.incoming();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, source)) => match Frame::decode(&buf[..len], direction) {
                                Ok(frame) => sink.deliver(ConnectionEvent::Update { source, frame }),
                                Err(e) => {
                                    tracing::warn!("Dropping malformed update from {source}: {e}");
                                }
                            },
                            // ICMP port-unreachable surfaces here on some platforms.
                            Err(e) => tracing::debug!("Update socket receive error: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Update receiver shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut queue: mpsc::Receiver<(Bytes, SocketAddr)>) {
    while let Some((payload, target)) = queue.recv().await {
        if let Err(e) = socket.send_to(&payload, target).await {
            // ICMP errors from earlier datagrams can surface on any send.
            tracing::debug!("Update to {target} failed: {e}");
        }
    }
    tracing::trace!("Update writer stopped");
}
