//! Client handle for connecting to a GhostNet server.
//!
//! Opens the management stream, waits for the server's handshake frame to
//! learn the assigned player id, and binds an update socket on the same
//! local address as the stream so the server can associate the two.
//! State changes are published through a [`watch`] channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ghostnet_proto::framing::{self, FrameConfig, FrameError};
use ghostnet_proto::{Direction, Frame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::connection::{Channel, ConnectionError, ConnectionEvent, EventSink};
use crate::update::UpdateSocket;

/// How long [`GhostClient::connect`] waits for the handshake frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the stream and waiting for the handshake.
    Connecting,
    /// Handshake received.
    Connected,
    /// Stream closed, by either side.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
#[derive(Debug)]
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Starts in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

/// A connected GhostNet client.
#[derive(Debug)]
pub struct GhostClient {
    player_id: u32,
    server: SocketAddr,
    outbox: mpsc::Sender<Bytes>,
    updates: UpdateSocket,
    incoming: mpsc::UnboundedReceiver<(Channel, Frame)>,
    state: Arc<ConnectionStateWatch>,
    shutdown_tx: watch::Sender<bool>,
    config: FrameConfig,
}

impl GhostClient {
    /// Connects to the server at `server`, whose update socket listens on
    /// the same address.
    pub async fn connect(server: SocketAddr, config: FrameConfig) -> Result<Self, ConnectionError> {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let stream = TcpStream::connect(server).await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;

        let updates = match UpdateSocket::bind_as(local, Direction::ClientToServer).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::debug!("Could not bind update socket to {local} ({e}), using any port");
                UpdateSocket::bind_as(SocketAddr::new(local.ip(), 0), Direction::ClientToServer)
                    .await?
            }
        };

        let (reader, writer) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (incoming_tx, mut incoming) = mpsc::unbounded_channel();
        let (outbox, queue) = mpsc::channel(config.outbox_capacity.max(1));

        tokio::spawn(read_loop(
            reader,
            incoming_tx.clone(),
            Arc::clone(&state),
            shutdown_rx.clone(),
            config.clone(),
        ));
        tokio::spawn(write_loop(
            writer,
            queue,
            Arc::clone(&state),
            shutdown_rx.clone(),
            config.clone(),
        ));
        let update_tx = incoming_tx;
        updates.spawn_receiver(
            EventSink::new(move |event| {
                if let ConnectionEvent::Update { frame, .. } = event {
                    let _ = update_tx.send((Channel::Update, frame));
                }
            }),
            shutdown_rx,
        );

        let mut state_rx = state.subscribe();
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                tokio::select! {
                    received = incoming.recv() => match received {
                        Some((Channel::Management, frame)) if frame.server_info.is_some() => {
                            return frame.player_id();
                        }
                        Some(_) => {}
                        None => return None,
                    },
                    _ = state_rx.changed() => {
                        if *state_rx.borrow_and_update() == ConnectionState::Disconnected {
                            return None;
                        }
                    }
                }
            }
        })
        .await;

        let player_id = match handshake {
            Ok(Some(id)) => id,
            Ok(None) => {
                let _ = shutdown_tx.send(true);
                return Err(ConnectionError::Closed);
            }
            Err(_) => {
                let _ = shutdown_tx.send(true);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no handshake from server",
                )
                .into());
            }
        };

        state.set(ConnectionState::Connected);
        tracing::info!("Connected to {server} as player {player_id}");

        Ok(Self {
            player_id,
            server,
            outbox,
            updates,
            incoming,
            state,
            shutdown_tx,
            config,
        })
    }

    /// Id the server assigned in its handshake.
    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Local address of the update socket.
    pub fn update_addr(&self) -> std::io::Result<SocketAddr> {
        self.updates.local_addr()
    }

    pub fn send_management(&self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.state.current() == ConnectionState::Disconnected {
            return Err(ConnectionError::Closed);
        }
        let payload = frame.encode(Direction::ClientToServer);
        let max = self.config.max_payload_size as usize;
        if payload.len() > max {
            return Err(ConnectionError::TooLarge {
                size: payload.len(),
                max,
            });
        }
        self.outbox.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backlogged,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    pub fn send_update(&self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.state.current() == ConnectionState::Disconnected {
            return Err(ConnectionError::Closed);
        }
        self.updates.send_to(frame, self.server)
    }

    /// Waits for the next frame from either channel.
    pub async fn recv(&mut self) -> Option<(Channel, Frame)> {
        self.incoming.recv().await
    }

    /// Waits up to `timeout` for the next frame.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<(Channel, Frame)> {
        tokio::time::timeout(timeout, self.incoming.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<(Channel, Frame)> {
        self.incoming.try_recv().ok()
    }

    /// Closes both channels.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }
}

impl Drop for GhostClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    incoming: mpsc::UnboundedSender<(Channel, Frame)>,
    state: Arc<ConnectionStateWatch>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: FrameConfig,
) {
    loop {
        tokio::select! {
            result = framing::read_frame(&mut reader, Direction::ServerToClient, &config) => {
                match result {
                    Ok(Ok(frame)) => {
                        let _ = incoming.send((Channel::Management, frame));
                    }
                    Ok(Err(e)) => tracing::warn!("Dropping malformed frame from server: {e}"),
                    Err(FrameError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::warn!("Management stream failed: {e}");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    state.set(ConnectionState::Disconnected);
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
    state: Arc<ConnectionStateWatch>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: FrameConfig,
) {
    loop {
        tokio::select! {
            payload = queue.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = framing::write_payload(&mut writer, &payload, &config).await {
                    tracing::warn!("Send to server failed: {e}");
                    state.set(ConnectionState::Disconnected);
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}
