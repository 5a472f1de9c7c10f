//! Frames: one logical protocol message made of optional chunks.
//!
//! On the wire a frame is a sequence of chunk records:
//!
//! ```text
//! +-----------------+-----------------+--------------------+
//! | id (string)     | length (u32 LE) |  payload           |
//! +-----------------+-----------------+--------------------+
//! | id (string)     | length (u32 LE) |  payload           |  ...
//! ```
//!
//! Records continue until the end of the buffer. Unknown ids are skipped
//! using their length, so older peers tolerate newer chunk kinds.

use bytes::Bytes;

use crate::chunk::{Chunk, Direction, REGISTRY, lookup};
use crate::chunks::{Chat, Emote, Head, PlayerStatus, Request, ServerInfo, Session, Update};
use crate::codec::{ChunkReader, ChunkWriter, DecodeError, MAX_CHUNK_ID_LEN};

/// One protocol message. Every slot is either present or absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub head: Option<Head>,
    pub server_info: Option<ServerInfo>,
    pub player: Option<PlayerStatus>,
    pub request: Option<Request>,
    pub session: Option<Session>,
    pub chat: Option<Chat>,
    pub emote: Option<Emote>,
    pub update: Option<Update>,
    /// Set once this frame has been fanned out. Never serialized.
    pub(crate) propagated: bool,
}

impl Frame {
    /// An empty frame about `player_id`.
    pub fn about(player_id: u32) -> Self {
        Self {
            head: Some(Head::new(player_id)),
            ..Default::default()
        }
    }

    // --- Builders ---

    pub fn with_head(mut self, head: Head) -> Self {
        self.head = Some(head);
        self
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = Some(server_info);
        self
    }

    pub fn with_player(mut self, player: PlayerStatus) -> Self {
        self.player = Some(player);
        self
    }

    pub fn with_request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_chat(mut self, chat: Chat) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_emote(mut self, emote: Emote) -> Self {
        self.emote = Some(emote);
        self
    }

    pub fn with_update(mut self, update: Update) -> Self {
        self.update = Some(update);
        self
    }

    // --- Accessors ---

    /// Player id from the head chunk, if present.
    pub fn player_id(&self) -> Option<u32> {
        self.head.map(|head| head.player_id)
    }

    /// The slot for chunk kind `C`.
    pub fn get<C: Chunk>(&self) -> Option<&C> {
        C::slot(self).as_ref()
    }

    /// Whether chunk kind `C` is present.
    pub fn has<C: Chunk>(&self) -> bool {
        C::slot(self).is_some()
    }

    /// Whether the chunk kind with wire id `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        lookup(id).is_some_and(|entry| entry.is_present(self))
    }

    /// Whether no chunk is present.
    pub fn is_empty(&self) -> bool {
        !REGISTRY.iter().any(|entry| entry.is_present(self))
    }

    /// Whether the frame has already been fanned out.
    pub fn is_propagated(&self) -> bool {
        self.propagated
    }

    /// Marks the frame as fanned out. Returns `false` if it already was.
    pub fn mark_propagated(&mut self) -> bool {
        !std::mem::replace(&mut self.propagated, true)
    }

    /// Serializes every present chunk allowed in `direction`, in canonical order.
    pub fn encode(&self, direction: Direction) -> Bytes {
        let mut writer = ChunkWriter::new();
        for entry in &REGISTRY {
            if !entry.is_present(self) || !entry.permits(direction) {
                continue;
            }
            writer.string(entry.id);
            let at = writer.len_placeholder();
            entry.encode(self, &mut writer);
            writer.patch_len(at);
        }
        writer.finish()
    }

    /// Parses a frame that travelled in `direction`.
    ///
    /// Chunks not permitted in `direction` are discarded rather than treated
    /// as errors. Any malformed record fails the whole frame.
    pub fn decode(payload: &[u8], direction: Direction) -> Result<Frame, DecodeError> {
        let mut reader = ChunkReader::new(payload);
        let mut frame = Frame::default();

        while reader.remaining() > 0 {
            let id = reader.string()?;
            if id.is_empty() || id.len() > MAX_CHUNK_ID_LEN {
                return Err(DecodeError::InvalidId(id.len()));
            }
            let len = reader.u32()? as usize;
            let body = reader.bytes(len)?;

            match lookup(&id) {
                Some(entry) if entry.permits(direction) => entry.decode(&mut frame, body)?,
                Some(_) => tracing::trace!("Discarding server-only chunk {id}"),
                None => tracing::trace!("Skipping unknown chunk {id} ({len} bytes)"),
            }
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::AreaMode;
    use crate::codec::Vec2;

    fn status() -> PlayerStatus {
        PlayerStatus {
            name: "Theo".to_string(),
            sid: "Celeste/1-ForsakenCity".to_string(),
            mode: AreaMode::BSide,
            level: "a-02".to_string(),
        }
    }

    #[test]
    fn test_head_and_status_roundtrip_leaves_others_absent() {
        let frame = Frame {
            head: Some(Head::new(3)),
            player: Some(status()),
            ..Default::default()
        };

        let bytes = frame.encode(Direction::ClientToServer);
        let decoded = Frame::decode(&bytes, Direction::ClientToServer).unwrap();

        assert_eq!(decoded.head, Some(Head::new(3)));
        assert_eq!(decoded.player, Some(status()));
        assert!(decoded.server_info.is_none());
        assert!(decoded.request.is_none());
        assert!(decoded.session.is_none());
        assert!(decoded.chat.is_none());
        assert!(decoded.emote.is_none());
        assert!(decoded.update.is_none());
    }

    #[test]
    fn test_empty_buffer_is_empty_frame() {
        let frame = Frame::decode(&[], Direction::ServerToClient).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_unknown_chunk_is_skipped() {
        let mut writer = ChunkWriter::new();
        writer.string("zzz");
        let at = writer.len_placeholder();
        writer.u32(0xDEAD_BEEF);
        writer.string("from the future");
        writer.patch_len(at);
        let mut bytes = writer.finish().to_vec();
        bytes.extend_from_slice(&Frame::about(5).encode(Direction::ServerToClient));

        let frame = Frame::decode(&bytes, Direction::ServerToClient).unwrap();
        assert_eq!(frame.player_id(), Some(5));
    }

    #[test]
    fn test_server_info_not_written_by_client() {
        let frame = Frame {
            head: Some(Head::new(0)),
            server_info: Some(ServerInfo),
            ..Default::default()
        };
        let client_bytes = frame.encode(Direction::ClientToServer);
        let server_bytes = frame.encode(Direction::ServerToClient);
        assert!(client_bytes.len() < server_bytes.len());

        let decoded = Frame::decode(&server_bytes, Direction::ServerToClient).unwrap();
        assert!(decoded.has::<ServerInfo>());
    }

    #[test]
    fn test_forged_server_info_from_client_is_discarded() {
        let frame = Frame {
            head: Some(Head::new(0)),
            server_info: Some(ServerInfo),
            ..Default::default()
        };
        let bytes = frame.encode(Direction::ServerToClient);

        let decoded = Frame::decode(&bytes, Direction::ClientToServer).unwrap();
        assert!(decoded.server_info.is_none());
        assert_eq!(decoded.player_id(), Some(0));
    }

    #[test]
    fn test_truncated_record_fails_frame() {
        let frame = Frame {
            head: Some(Head::new(1)),
            update: Some(Update::at(4, Vec2::new(1.0, 2.0))),
            ..Default::default()
        };
        let bytes = frame.encode(Direction::ClientToServer);
        let result = Frame::decode(&bytes[..bytes.len() - 1], Direction::ClientToServer);
        assert!(matches!(result, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_oversized_length_prefix_fails_frame() {
        let mut writer = ChunkWriter::new();
        writer.string(Head::ID);
        writer.u32(1_000_000);
        writer.u32(1);
        let bytes = writer.finish();
        assert!(Frame::decode(&bytes, Direction::ClientToServer).is_err());
    }

    #[test]
    fn test_trailing_bytes_in_known_chunk_are_ignored() {
        let mut writer = ChunkWriter::new();
        writer.string(Head::ID);
        let at = writer.len_placeholder();
        writer.u32(9);
        writer.u8(0xFF);
        writer.patch_len(at);
        let bytes = writer.finish();

        let frame = Frame::decode(&bytes, Direction::ClientToServer).unwrap();
        assert_eq!(frame.player_id(), Some(9));
    }

    #[test]
    fn test_propagated_marker_set_once_and_not_serialized() {
        let mut frame = Frame::about(2);
        assert!(!frame.is_propagated());
        assert!(frame.mark_propagated());
        assert!(!frame.mark_propagated());

        let decoded = Frame::decode(
            &frame.encode(Direction::ServerToClient),
            Direction::ServerToClient,
        )
        .unwrap();
        assert!(!decoded.is_propagated());
    }

    #[test]
    fn test_builders_fill_slots_without_marking() {
        let frame = Frame::about(6)
            .with_chat(Chat::text("hi"))
            .with_update(Update::at(2, Vec2::new(1.0, 1.0)));
        assert_eq!(frame.player_id(), Some(6));
        assert_eq!(frame.chat.as_ref().map(|chat| chat.text.as_str()), Some("hi"));
        assert!(frame.has::<Update>());
        assert!(!frame.has::<PlayerStatus>());
        assert!(!frame.is_propagated());

        let frame = Frame::default()
            .with_player(status())
            .with_request(Request::of::<Session>());
        assert!(frame.head.is_none());
        assert!(frame.request.unwrap().wants::<Session>());
    }

    #[test]
    fn test_chunks_written_in_canonical_order() {
        let frame = Frame {
            head: Some(Head::new(1)),
            update: Some(Update::at(1, Vec2::default())),
            emote: Some(Emote::new("hi")),
            ..Default::default()
        };
        let bytes = frame.encode(Direction::ClientToServer);
        let mut reader = ChunkReader::new(&bytes);
        let mut ids = Vec::new();
        while reader.remaining() > 0 {
            ids.push(reader.string().unwrap());
            let len = reader.u32().unwrap() as usize;
            reader.bytes(len).unwrap();
        }
        assert_eq!(ids, vec!["nH", "nME", "nU"]);
    }

    #[test]
    fn test_typed_accessors() {
        let frame = Frame {
            session: Some(Session::default()),
            ..Frame::about(4)
        };
        assert!(frame.has::<Session>());
        assert!(!frame.has::<Update>());
        assert!(frame.contains("nMS"));
        assert!(!frame.contains("nU"));
        assert!(!frame.contains("zz"));
        assert_eq!(frame.get::<Head>(), Some(&Head::new(4)));
    }
}
