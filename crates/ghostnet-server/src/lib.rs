//! GhostNet server.
//!
//! Relays player status, chat, emotes and positions between clients so
//! every player sees the others' ghosts. [`GhostServer`] owns the sockets
//! and tasks; [`ServerState`] holds the registry and all dispatch rules;
//! [`commands`] implements the chat commands.

pub mod commands;
pub mod query;
pub mod server;
pub mod state;

pub use commands::{Command, CommandEnv, CommandError, CommandRegistry};
pub use query::{QueryGuard, SessionQueries};
pub use server::{GhostServer, ServerError};
pub use state::{Mailbox, PlayerState, ServerEvent, ServerSettings, ServerState};
