//! The running server: accept loop, update receiver and dispatch task.

use std::net::SocketAddr;

use ghostnet_config::Config;
use ghostnet_net::platform::{configure_stream, create_listener, create_update_socket};
use ghostnet_net::{LocalClient, LocalConnection, RemoteConnection, SocketConfig, UpdateSocket};
use ghostnet_proto::{Direction, FrameConfig};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::commands::CommandRegistry;
use crate::state::{Mailbox, ServerEvent, ServerSettings, ServerState};

/// Errors starting or driving a [`GhostServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tasks and handles of a started server.
struct Running {
    local_addr: SocketAddr,
    mailbox: Mailbox,
    shutdown_tx: watch::Sender<bool>,
    accept: JoinHandle<()>,
    updates: JoinHandle<()>,
    dispatch: JoinHandle<()>,
    next_local_port: u16,
}

/// A GhostNet server.
///
/// Management traffic arrives over TCP and updates over UDP on the same
/// port. All state lives on one dispatch task; the accept loop and the
/// per-connection readers only feed it events.
pub struct GhostServer {
    config: Config,
    socket_config: SocketConfig,
    commands: Option<CommandRegistry>,
    running: Option<Running>,
}

impl GhostServer {
    /// A stopped server with the built-in commands.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            socket_config: SocketConfig::default(),
            commands: Some(CommandRegistry::standard()),
            running: None,
        }
    }

    /// Replaces the command set. Takes effect on the next start.
    pub fn with_commands(mut self, commands: CommandRegistry) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_socket_config(mut self, socket_config: SocketConfig) -> Self {
        self.socket_config = socket_config;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the management listener and update socket are bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Binds both channels and starts serving. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.config.server.socket_addr();
        let listener = create_listener(addr, &self.socket_config)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        // Same port as the listener, so an ephemeral port resolves once.
        let udp = create_update_socket(local_addr, &self.socket_config).map_err(|source| {
            ServerError::Bind {
                addr: local_addr,
                source,
            }
        })?;
        let updates = UpdateSocket::from_socket(udp, Direction::ServerToClient);

        let (mailbox, events) = Mailbox::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let commands = self.commands.take().unwrap_or_else(CommandRegistry::standard);
        let state = ServerState::new(
            ServerSettings::from_config(&self.config),
            commands,
            mailbox.clone(),
        );
        let dispatch = tokio::spawn(dispatch_loop(state, events));
        let update_task = updates.spawn_receiver(mailbox.sink(), shutdown_rx.clone());
        let accept = tokio::spawn(accept_loop(
            listener,
            updates,
            mailbox.clone(),
            self.socket_config.clone(),
            FrameConfig::with_max_payload(self.config.server.max_frame_size)
                .with_outbox_capacity(self.config.server.outbox_capacity),
            shutdown_rx,
        ));

        tracing::info!("GhostNet server listening on {local_addr} (TCP + UDP)");
        self.running = Some(Running {
            local_addr,
            mailbox,
            shutdown_tx,
            accept,
            updates: update_task,
            dispatch,
            next_local_port: 1,
        });
        Ok(local_addr)
    }

    /// Attaches an in-process client. The handshake arrives on the
    /// returned client like it would for a remote one.
    pub fn connect_local(&mut self) -> Result<LocalClient, ServerError> {
        let running = self.running.as_mut().ok_or(ServerError::NotRunning)?;

        // Local clients get placeholder endpoints no socket can have.
        let endpoint = SocketAddr::from(([0, 0, 0, 0], running.next_local_port));
        running.next_local_port = running.next_local_port.wrapping_add(1).max(1);

        let (conn, client) = LocalConnection::pair(endpoint, running.mailbox.sink());
        if !running.mailbox.post(ServerEvent::Accepted(conn)) {
            return Err(ServerError::NotRunning);
        }
        Ok(client)
    }

    /// Stops accepting, closes every connection and waits for all tasks.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        tracing::info!("GhostNet server shutting down");

        running.shutdown_tx.send_replace(true);
        let _ = running.accept.await;
        let _ = running.updates.await;

        running.mailbox.post(ServerEvent::Shutdown);
        let _ = running.dispatch.await;
        tracing::info!("GhostNet server stopped");
    }
}

impl Drop for GhostServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown_tx.send_replace(true);
            running.mailbox.post(ServerEvent::Shutdown);
        }
    }
}

async fn dispatch_loop(mut state: ServerState, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        if state.handle(event).is_break() {
            break;
        }
    }
    tracing::debug!("Dispatcher stopped");
}

async fn accept_loop(
    listener: TcpListener,
    updates: UpdateSocket,
    mailbox: Mailbox,
    socket_config: SocketConfig,
    frame_config: FrameConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {e}");
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        continue;
                    }
                };
                if let Err(e) = configure_stream(&stream, &socket_config) {
                    tracing::warn!("Could not configure socket of {peer}: {e}");
                }

                let (conn, reader) = RemoteConnection::open(
                    stream,
                    peer,
                    updates.clone(),
                    mailbox.sink(),
                    frame_config.clone(),
                );
                // Registered before its first frame can be read.
                if !mailbox.post(ServerEvent::Accepted(conn)) {
                    break;
                }
                reader.start();
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Accept loop stopped");
}
