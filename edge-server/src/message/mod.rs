//! 消息总线与帧编解码
//!
//! - [`EventBus`]: in-process broadcast of [`EngineEvent`]s
//! - frame codec `[u8 event_type][u32 LE len][payload]`, shared by the
//!   rack-controller link and any outward relay

mod bus;

pub use bus::EventBus;
pub use shared::message::{BusMessage, EngineEvent, EventType};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Frames larger than this are rejected before allocating
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event type: {0}")]
    InvalidEventType(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Read one frame
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<BusMessage, CodecError> {
    let mut type_buf = [0u8; 1];
    reader.read_exact(&mut type_buf).await?;
    let event_type =
        EventType::try_from(type_buf[0]).map_err(|_| CodecError::InvalidEventType(type_buf[0]))?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(BusMessage::new(event_type, payload))
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), CodecError> {
    if msg.payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(msg.payload.len()));
    }
    let mut data = Vec::with_capacity(5 + msg.payload.len());
    data.push(msg.event_type as u8);
    data.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&msg.payload);

    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}
