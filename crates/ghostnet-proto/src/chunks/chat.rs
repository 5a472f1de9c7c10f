//! Chat lines and emotes.

use crate::chunk::Chunk;
use crate::codec::{ChunkReader, ChunkWriter, Color, DecodeError};
use crate::frame::Frame;

/// A chat line. The server assigns `id`; re-sending a line with the same id
/// replaces it on the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chat {
    /// Server-assigned message id.
    pub id: u32,
    /// Short label shown before the text (e.g., "server").
    pub tag: String,
    /// Message text.
    pub text: String,
    /// Text color.
    pub color: Color,
}

impl Chat {
    /// A chat line carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

impl Chunk for Chat {
    const ID: &'static str = "nMC";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: reader.u32()?,
            tag: reader.string()?,
            text: reader.string()?,
            color: reader.color()?,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        writer.u32(self.id);
        writer.string(&self.tag);
        writer.string(&self.text);
        writer.color(self.color);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.chat
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.chat
    }
}

/// Text or icon shown over a player's ghost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Emote {
    /// Raw emote. `i:`, `g:` and `p:` prefixes name icons, which clients
    /// resolve themselves.
    pub value: String,
}

impl Emote {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Chunk for Emote {
    const ID: &'static str = "nME";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            value: reader.string()?,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        writer.string(&self.value);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.emote
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.emote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_emote_passes_through_verbatim() {
        let emote = Emote::new("p:12 madeline/normal00 madeline/normal01");
        let mut writer = ChunkWriter::new();
        emote.write(&mut writer);
        let bytes = writer.finish();
        let decoded = Emote::read(&mut ChunkReader::new(&bytes)).unwrap();
        assert_eq!(decoded, emote);
    }

    #[test]
    fn test_chat_text_constructor() {
        let chat = Chat::text("hi");
        assert_eq!(chat.text, "hi");
        assert_eq!(chat.id, 0);
        assert_eq!(chat.color, Color::WHITE);
    }
}
