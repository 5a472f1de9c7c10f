//! Concrete chunk kinds.

mod chat;
mod player;
mod session;
mod update;

pub use chat::{Chat, Emote};
pub use player::{AreaMode, PlayerStatus};
pub use session::{Session, SessionState};
pub use update::Update;

use crate::chunk::Chunk;
use crate::codec::{ChunkReader, ChunkWriter, DecodeError};
use crate::frame::Frame;

/// Identifies the player a frame is about. Always overwritten by the server
/// with the id it assigned to the sending connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Head {
    /// Server-assigned player id.
    pub player_id: u32,
}

impl Head {
    pub fn new(player_id: u32) -> Self {
        Self { player_id }
    }
}

impl Chunk for Head {
    const ID: &'static str = "nH";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            player_id: reader.u32()?,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        writer.u32(self.player_id);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.head
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.head
    }
}

/// Marks the server's handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerInfo;

impl Chunk for ServerInfo {
    const ID: &'static str = "nM?";
    const SERVER_ONLY: bool = true;

    fn read(_reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self)
    }

    fn write(&self, _writer: &mut ChunkWriter) {}

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.server_info
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.server_info
    }
}

/// Asks the receiving peer to answer with a chunk of the named kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    /// Wire identifier of the requested chunk kind.
    pub id: String,
}

impl Request {
    /// A request for chunk kind `C`.
    pub fn of<C: Chunk>() -> Self {
        Self {
            id: C::ID.to_string(),
        }
    }

    /// Whether this requests chunk kind `C`.
    pub fn wants<C: Chunk>(&self) -> bool {
        self.id == C::ID
    }
}

impl Chunk for Request {
    const ID: &'static str = "nMR";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: reader.string()?,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        writer.string(&self.id);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.request
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.request
    }
}
