//! Management stream framing.
//!
//! The management channel is a byte stream, so each encoded [`Frame`] is
//! wrapped in a length prefix:
//!
//! ```text
//! +-------------------+------------------------------+
//! | length (4 bytes)  |   frame payload              |
//! | u32 little-endian |   (chunk records)            |
//! +-------------------+------------------------------+
//! ```
//!
//! The prefix does not count itself. A zero length carries an empty frame.
//! A prefix above the configured limit is a stream error: the peer is out
//! of sync or hostile and the connection is closed. A payload that fails to
//! decode only loses that one frame.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::chunk::Direction;
use crate::codec::DecodeError;
use crate::frame::Frame;

/// Limits for the management stream.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted frame payload in bytes. Default: 64 KiB.
    pub max_payload_size: u32,
    /// Frames that may wait for the writer before sends are refused.
    /// Default: 256.
    pub outbox_capacity: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 65_536,
            outbox_capacity: 256,
        }
    }
}

impl FrameConfig {
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            max_payload_size,
            ..Self::default()
        }
    }

    pub fn with_outbox_capacity(mut self, outbox_capacity: usize) -> Self {
        self.outbox_capacity = outbox_capacity.max(1);
        self
    }
}

/// Errors that end a management stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The peer closed the stream, possibly in the middle of a frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_or_io(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Reads one length-prefixed payload from the stream.
pub async fn read_payload<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Bytes, FrameError> {
    let len = reader.read_u32_le().await.map_err(closed_or_io)?;
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    let mut payload = BytesMut::zeroed(len as usize);
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(closed_or_io)?;
    }
    Ok(payload.freeze())
}

/// Writes one length-prefixed payload and flushes the stream.
pub async fn write_payload<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = payload.len() as u32;
    if payload.len() > config.max_payload_size as usize {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    writer.write_u32_le(len).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads and decodes one frame.
///
/// The outer `Result` reports stream failures; the inner one reports a
/// payload that arrived intact but did not decode.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    direction: Direction,
    config: &FrameConfig,
) -> Result<Result<Frame, DecodeError>, FrameError> {
    let payload = read_payload(reader, config).await?;
    Ok(Frame::decode(&payload, direction))
}

/// Encodes and writes one frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
    direction: Direction,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    write_payload(writer, &frame.encode(direction), config).await
}
