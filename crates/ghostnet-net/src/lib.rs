//! GhostNet transport layer.
//!
//! Every client is reached through a [`Connection`]: a reliable management
//! path and a best-effort update path. Two implementations exist:
//!
//! - [`LocalConnection`]: in-process loopback, no sockets involved.
//! - [`RemoteConnection`]: a TCP management stream plus the server's shared
//!   UDP [`UpdateSocket`].
//!
//! Inbound traffic and disconnects are reported as [`ConnectionEvent`]s to an
//! [`EventSink`], so the server can process everything on one task.
//! [`GhostClient`] is the matching client side.

pub mod client;
pub mod connection;
pub mod local;
pub mod platform;
pub mod remote;
pub mod update;

pub use client::{ConnectionState, ConnectionStateWatch, GhostClient};
pub use connection::{Channel, Connection, ConnectionError, ConnectionEvent, EventSink};
pub use local::{LocalClient, LocalConnection};
pub use platform::SocketConfig;
pub use remote::{RemoteConnection, RemoteReader};
pub use update::UpdateSocket;
