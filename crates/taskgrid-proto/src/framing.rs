//! Length-prefixed framing over async byte streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::ProtoError;
use crate::message::Message;

/// Upper bound on a single frame's payload. Frames past this are a
/// protocol violation, not a legitimate large result.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one message as a `[u32 big-endian length][payload]` frame.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let payload = msg.to_bytes()?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(payload.len()));
    }

    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;

    trace!(variant = msg.variant_name(), bytes = payload.len(), "frame sent");
    Ok(())
}

/// Read one complete frame and decode it.
///
/// Blocking-exact: reads precisely the prefixed number of bytes,
/// looping on partial reads. EOF before the frame completes is
/// [`ProtoError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let msg = Message::from_bytes(&payload)?;
    trace!(variant = msg.variant_name(), bytes = len, "frame received");
    Ok(msg)
}
