//! Session snapshot used to reproduce another player's run.

use crate::chunk::Chunk;
use crate::codec::{ChunkReader, ChunkWriter, DecodeError, Vec2};
use crate::frame::Frame;

/// Reply to a [`Request`](super::Request) for the session chunk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    /// `None` when the player is not in a session (e.g., in the menus).
    pub state: Option<SessionState>,
}

/// Enough of a running session to start the same one elsewhere.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// Last checkpoint, if one was reached.
    pub respawn_point: Option<Vec2>,
    /// Dash count of the inventory.
    pub dashes: u8,
    /// Whether the inventory is in dream mode.
    pub dreaming: bool,
    /// Session-wide flags.
    pub flags: Vec<String>,
    /// Per-level flags.
    pub level_flags: Vec<String>,
    /// Collected strawberries, by entity id.
    pub strawberries: Vec<String>,
    /// Furthest level seen in this session.
    pub furthest_seen_level: String,
    /// Session time in ticks.
    pub time: i64,
    /// Deaths in this session.
    pub deaths: i32,
}

impl Session {
    /// Whether the player is in a session.
    pub fn in_session(&self) -> bool {
        self.state.is_some()
    }
}

impl Chunk for Session {
    const ID: &'static str = "nMS";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        if !reader.bool()? {
            return Ok(Self { state: None });
        }

        let respawn_point = if reader.bool()? {
            Some(reader.vec2()?)
        } else {
            None
        };

        Ok(Self {
            state: Some(SessionState {
                respawn_point,
                dashes: reader.u8()?,
                dreaming: reader.bool()?,
                flags: reader.strings()?,
                level_flags: reader.strings()?,
                strawberries: reader.strings()?,
                furthest_seen_level: reader.string()?,
                time: reader.i64()?,
                deaths: reader.i32()?,
            }),
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        let Some(state) = &self.state else {
            writer.bool(false);
            return;
        };

        writer.bool(true);
        match state.respawn_point {
            Some(point) => {
                writer.bool(true);
                writer.vec2(point);
            }
            None => writer.bool(false),
        }
        writer.u8(state.dashes);
        writer.bool(state.dreaming);
        writer.strings(&state.flags);
        writer.strings(&state.level_flags);
        writer.strings(&state.strawberries);
        writer.string(&state.furthest_seen_level);
        writer.i64(state.time);
        writer.i32(state.deaths);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.session
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.session
    }
}
