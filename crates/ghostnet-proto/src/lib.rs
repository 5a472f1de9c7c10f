//! GhostNet wire protocol.
//!
//! A [`Frame`] is one protocol message: a fixed set of optional chunk slots
//! (player header, status, chat, emote, session data, position update, ...).
//! Each present chunk is written as an `[id][length][payload]` record, in a
//! canonical order fixed by [`chunk::REGISTRY`]. Decoding skips records whose
//! id it does not know.
//!
//! The same frame encoding travels over both channels:
//!
//! - the **management** stream, where [`framing`] adds a length prefix;
//! - the **update** datagram channel, one frame per datagram.

pub mod chunk;
pub mod chunks;
pub mod codec;
pub mod frame;
pub mod framing;

pub use chunk::{Chunk, Direction};
pub use chunks::{
    AreaMode, Chat, Emote, Head, PlayerStatus, Request, ServerInfo, Session, SessionState, Update,
};
pub use codec::{Color, DecodeError, Vec2};
pub use frame::Frame;
pub use framing::{FrameConfig, FrameError};
