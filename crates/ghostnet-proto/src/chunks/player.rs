//! Player status: who a player is and where they are.

use crate::chunk::Chunk;
use crate::codec::{ChunkReader, ChunkWriter, DecodeError};
use crate::frame::Frame;

/// Which side of a chapter the player is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AreaMode {
    #[default]
    Normal,
    BSide,
    CSide,
}

impl TryFrom<u8> for AreaMode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::BSide),
            2 => Ok(Self::CSide),
            _ => Err(DecodeError::InvalidValue {
                field: "mode",
                value,
            }),
        }
    }
}

impl From<AreaMode> for u8 {
    fn from(mode: AreaMode) -> u8 {
        match mode {
            AreaMode::Normal => 0,
            AreaMode::BSide => 1,
            AreaMode::CSide => 2,
        }
    }
}

/// A player's display name and current location.
///
/// A status with an empty name, SID and level announces that the player has
/// left; clients remove that ghost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerStatus {
    /// Display name.
    pub name: String,
    /// Level-set identifier. Empty while in the menus.
    pub sid: String,
    /// Chapter side.
    pub mode: AreaMode,
    /// Current level (room) name.
    pub level: String,
}

impl PlayerStatus {
    /// The status broadcast when a player disconnects.
    pub fn departure() -> Self {
        Self::default()
    }

    /// Whether this status announces a departure.
    pub fn is_departure(&self) -> bool {
        self.name.is_empty() && self.sid.is_empty() && self.level.is_empty()
    }

    /// Whether both statuses place their players in the same room.
    pub fn same_room(&self, other: &PlayerStatus) -> bool {
        self.sid == other.sid && self.level == other.level
    }
}

impl Chunk for PlayerStatus {
    const ID: &'static str = "nM";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.string()?,
            sid: reader.string()?,
            mode: AreaMode::try_from(reader.u8()?)?,
            level: reader.string()?,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        writer.string(&self.name);
        writer.string(&self.sid);
        writer.u8(self.mode.into());
        writer.string(&self.level);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.player
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.player
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(sid: &str, level: &str) -> PlayerStatus {
        PlayerStatus {
            name: "Madeline".to_string(),
            sid: sid.to_string(),
            mode: AreaMode::Normal,
            level: level.to_string(),
        }
    }

    #[test]
    fn test_same_room_requires_sid_and_level() {
        let a = status("city", "a");
        assert!(a.same_room(&status("city", "a")));
        assert!(!a.same_room(&status("city", "b")));
        assert!(!a.same_room(&status("summit", "a")));
    }

    #[test]
    fn test_departure_is_blank() {
        assert!(PlayerStatus::departure().is_departure());
        assert!(!status("city", "a").is_departure());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut writer = ChunkWriter::new();
        writer.string("x");
        writer.string("city");
        writer.u8(9);
        writer.string("a");
        let bytes = writer.finish();
        let result = PlayerStatus::read(&mut ChunkReader::new(&bytes));
        assert_eq!(
            result,
            Err(DecodeError::InvalidValue {
                field: "mode",
                value: 9
            })
        );
    }
}
