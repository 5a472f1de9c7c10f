//! Remote connections over TCP and the shared UDP update socket.
//!
//! Each remote connection owns two tasks: a reader that decodes
//! length-prefixed frames from the management stream and hands them to the
//! [`EventSink`], and a writer that drains a bounded outbox so sending
//! never waits on a slow peer. A peer that lets the outbox fill up gets
//! [`ConnectionError::Backlogged`] and is treated as gone. Updates go to
//! the shared [`UpdateSocket`] once the client's update endpoint is known.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use ghostnet_proto::framing::{self, FrameConfig, FrameError};
use ghostnet_proto::{Direction, Frame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionError, ConnectionEvent, EventSink};
use crate::update::UpdateSocket;

/// State shared between the handle and its tasks.
#[derive(Debug)]
struct Shared {
    endpoint: SocketAddr,
    update: Mutex<Option<SocketAddr>>,
    disconnected: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    sink: EventSink,
}

impl Shared {
    fn update(&self) -> std::sync::MutexGuard<'_, Option<SocketAddr>> {
        self.update.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tears the connection down. Only the first call has any effect.
    fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        self.update().take();
        self.shutdown_tx.send_replace(true);
        self.sink.deliver(ConnectionEvent::Disconnected {
            endpoint: self.endpoint,
        });
    }
}

/// Server-side handle on a client connected over the network.
#[derive(Debug)]
pub struct RemoteConnection {
    shared: Arc<Shared>,
    outbox: mpsc::Sender<Bytes>,
    updates: UpdateSocket,
    max_frame_size: usize,
}

/// The not-yet-started read side of a [`RemoteConnection`].
///
/// Kept separate so the owner can register the connection before any of
/// its frames are delivered.
#[derive(Debug)]
pub struct RemoteReader {
    shared: Arc<Shared>,
    reader: OwnedReadHalf,
    config: FrameConfig,
}

impl RemoteConnection {
    /// Wraps an accepted stream and starts its writer task.
    pub fn open(
        stream: TcpStream,
        endpoint: SocketAddr,
        updates: UpdateSocket,
        sink: EventSink,
        config: FrameConfig,
    ) -> (Arc<RemoteConnection>, RemoteReader) {
        let (reader, writer) = stream.into_split();
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            endpoint,
            update: Mutex::new(None),
            disconnected: AtomicBool::new(false),
            shutdown_tx,
            sink,
        });

        let (outbox, queue) = mpsc::channel(config.outbox_capacity.max(1));
        tokio::spawn(write_loop(
            Arc::clone(&shared),
            writer,
            queue,
            config.clone(),
        ));

        let conn = Arc::new(RemoteConnection {
            shared: Arc::clone(&shared),
            outbox,
            updates,
            max_frame_size: config.max_payload_size as usize,
        });
        let reader = RemoteReader {
            shared,
            reader,
            config,
        };
        (conn, reader)
    }
}

impl RemoteReader {
    /// Starts delivering management frames.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(read_loop(self.shared, self.reader, self.config))
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, config: FrameConfig) {
    let endpoint = shared.endpoint;
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    while !*shutdown_rx.borrow_and_update() {
        tokio::select! {
            result = framing::read_frame(&mut reader, Direction::ClientToServer, &config) => {
                match result {
                    Ok(Ok(frame)) => shared.sink.deliver(ConnectionEvent::Management { endpoint, frame }),
                    Ok(Err(e)) => tracing::warn!("Dropping malformed frame from {endpoint}: {e}"),
                    Err(FrameError::ConnectionClosed) => {
                        tracing::debug!("{endpoint} closed the management stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Management stream of {endpoint} failed: {e}");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {}
        }
    }

    shared.disconnect();
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
    config: FrameConfig,
) {
    let endpoint = shared.endpoint;
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    while !*shutdown_rx.borrow_and_update() {
        tokio::select! {
            payload = queue.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = framing::write_payload(&mut writer, &payload, &config).await {
                    tracing::warn!("Send to {endpoint} failed: {e}");
                    shared.disconnect();
                    return;
                }
            }
            _ = shutdown_rx.changed() => {}
        }
    }

    // Flush what was queued before the close, e.g. a kick notice.
    while let Ok(payload) = queue.try_recv() {
        if framing::write_payload(&mut writer, &payload, &config).await.is_err() {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

impl Connection for RemoteConnection {
    fn management_endpoint(&self) -> SocketAddr {
        self.shared.endpoint
    }

    fn update_endpoint(&self) -> Option<SocketAddr> {
        *self.shared.update()
    }

    fn bind_update(&self, endpoint: SocketAddr) {
        *self.shared.update() = Some(endpoint);
    }

    fn unbind_update(&self) -> Option<SocketAddr> {
        self.shared.update().take()
    }

    fn send_management(&self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.shared.disconnected.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        let payload = frame.encode(Direction::ServerToClient);
        if payload.len() > self.max_frame_size {
            return Err(ConnectionError::TooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        self.outbox.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backlogged,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    fn send_update(&self, frame: &Frame) -> Result<(), ConnectionError> {
        let target = self.update_endpoint().ok_or(ConnectionError::NoUpdatePath)?;
        self.updates.send_to(frame, target)
    }

    fn close(&self) {
        self.shared.disconnect();
    }
}
