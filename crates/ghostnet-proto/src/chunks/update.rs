//! High-frequency position and appearance updates.

use crate::chunk::Chunk;
use crate::codec::{ChunkReader, ChunkWriter, Color, DecodeError, Vec2};
use crate::frame::Frame;

/// A ghost's position and visual state.
///
/// `update_index` increases monotonically per player; the server drops any
/// update whose index is lower than the last one it accepted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    /// Sequence number of this update.
    pub update_index: u32,
    pub position: Vec2,
    pub speed: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
    pub color: Color,
    pub hair_color: Color,
    /// -1 facing left, 1 facing right.
    pub facing: i8,
    /// Sprite animation currently playing.
    pub animation_id: String,
    pub animation_frame: i32,
    pub dead: bool,
}

impl Update {
    /// An update at `position` with the given sequence number.
    pub fn at(update_index: u32, position: Vec2) -> Self {
        Self {
            update_index,
            position,
            scale: Vec2::new(1.0, 1.0),
            facing: 1,
            ..Default::default()
        }
    }
}

impl Chunk for Update {
    const ID: &'static str = "nU";

    fn read(reader: &mut ChunkReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            update_index: reader.u32()?,
            position: reader.vec2()?,
            speed: reader.vec2()?,
            scale: reader.vec2()?,
            rotation: reader.f32()?,
            color: reader.color()?,
            hair_color: reader.color()?,
            facing: reader.i8()?,
            animation_id: reader.string()?,
            animation_frame: reader.i32()?,
            dead: reader.bool()?,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) {
        writer.u32(self.update_index);
        writer.vec2(self.position);
        writer.vec2(self.speed);
        writer.vec2(self.scale);
        writer.f32(self.rotation);
        writer.color(self.color);
        writer.color(self.hair_color);
        writer.i8(self.facing);
        writer.string(&self.animation_id);
        writer.i32(self.animation_frame);
        writer.bool(self.dead);
    }

    fn slot(frame: &Frame) -> &Option<Self> {
        &frame.update
    }

    fn slot_mut(frame: &mut Frame) -> &mut Option<Self> {
        &mut frame.update
    }
}
