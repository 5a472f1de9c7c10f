//! The [`Chunk`] trait and the static registry of chunk kinds.
//!
//! Each chunk kind owns one optional slot in a [`Frame`]. The registry maps
//! the short wire identifier of every kind to functions that move it between
//! the byte stream and that slot, and fixes the canonical order in which
//! present chunks are written.

use crate::chunks::{Chat, Emote, Head, PlayerStatus, Request, ServerInfo, Session, Update};
use crate::codec::{ChunkReader, ChunkWriter, DecodeError};
use crate::frame::Frame;

/// Which way a frame travels. Server-only chunks are never written by, or
/// accepted from, a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by a client, read by the server.
    ClientToServer,
    /// Sent by the server, read by a client.
    ServerToClient,
}

/// A typed, independently encodable unit of a [`Frame`].
pub trait Chunk: Sized {
    /// Wire identifier, unique across the registry.
    const ID: &'static str;

    /// Only the server may send this chunk.
    const SERVER_ONLY: bool = false;

    /// Reads the payload of one record.
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError>;

    /// Writes the payload of one record.
    fn write(&self, writer: &mut ChunkWriter);

    /// The frame slot holding this chunk kind.
    fn slot(frame: &Frame) -> &Option<Self>;

    /// Mutable access to the frame slot holding this chunk kind.
    fn slot_mut(frame: &mut Frame) -> &mut Option<Self>;
}

/// Registry entry for one chunk kind.
#[derive(Clone, Copy)]
pub struct ChunkEntry {
    /// Wire identifier.
    pub id: &'static str,
    /// Whether only the server may send it.
    pub server_only: bool,
    present: fn(&Frame) -> bool,
    encode: fn(&Frame, &mut ChunkWriter),
    decode: fn(&mut Frame, &[u8]) -> Result<(), DecodeError>,
}

impl ChunkEntry {
    /// Builds the entry for chunk kind `C`.
    pub const fn of<C: Chunk>() -> Self {
        Self {
            id: C::ID,
            server_only: C::SERVER_ONLY,
            present: present::<C>,
            encode: encode::<C>,
            decode: decode::<C>,
        }
    }

    /// Whether this kind may travel in `direction`.
    pub fn permits(&self, direction: Direction) -> bool {
        !self.server_only || direction == Direction::ServerToClient
    }

    pub(crate) fn is_present(&self, frame: &Frame) -> bool {
        (self.present)(frame)
    }

    pub(crate) fn encode(&self, frame: &Frame, writer: &mut ChunkWriter) {
        (self.encode)(frame, writer)
    }

    pub(crate) fn decode(&self, frame: &mut Frame, payload: &[u8]) -> Result<(), DecodeError> {
        (self.decode)(frame, payload)
    }
}

impl std::fmt::Debug for ChunkEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkEntry")
            .field("id", &self.id)
            .field("server_only", &self.server_only)
            .finish()
    }
}

fn present<C: Chunk>(frame: &Frame) -> bool {
    C::slot(frame).is_some()
}

fn encode<C: Chunk>(frame: &Frame, writer: &mut ChunkWriter) {
    if let Some(chunk) = C::slot(frame) {
        chunk.write(writer);
    }
}

fn decode<C: Chunk>(frame: &mut Frame, payload: &[u8]) -> Result<(), DecodeError> {
    let mut reader = ChunkReader::new(payload);
    *C::slot_mut(frame) = Some(C::read(&mut reader)?);
    // Trailing bytes belong to fields added by newer peers.
    Ok(())
}

/// Every known chunk kind, in canonical write order.
pub static REGISTRY: [ChunkEntry; 8] = [
    ChunkEntry::of::<Head>(),
    ChunkEntry::of::<ServerInfo>(),
    ChunkEntry::of::<PlayerStatus>(),
    ChunkEntry::of::<Request>(),
    ChunkEntry::of::<Session>(),
    ChunkEntry::of::<Chat>(),
    ChunkEntry::of::<Emote>(),
    ChunkEntry::of::<Update>(),
];

/// Looks up a chunk kind by its wire identifier.
pub fn lookup(id: &str) -> Option<&'static ChunkEntry> {
    REGISTRY.iter().find(|entry| entry.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_ids_are_unique_and_short() {
        let mut seen = HashSet::new();
        for entry in &REGISTRY {
            assert!(seen.insert(entry.id), "duplicate id {}", entry.id);
            assert!((2..=3).contains(&entry.id.len()), "id {} length", entry.id);
        }
    }

    #[test]
    fn test_lookup_finds_known_and_rejects_unknown() {
        assert_eq!(lookup("nH").unwrap().id, Head::ID);
        assert_eq!(lookup(Update::ID).unwrap().id, "nU");
        assert!(lookup("zz").is_none());
    }

    #[test]
    fn test_server_info_is_server_only() {
        let entry = lookup(ServerInfo::ID).unwrap();
        assert!(entry.server_only);
        assert!(!entry.permits(Direction::ClientToServer));
        assert!(entry.permits(Direction::ServerToClient));

        let head = lookup(Head::ID).unwrap();
        assert!(head.permits(Direction::ClientToServer));
    }

    #[test]
    fn test_head_is_written_first() {
        assert_eq!(REGISTRY[0].id, Head::ID);
    }
}
