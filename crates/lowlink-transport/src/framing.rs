//! Message framing over a byte stream.
//!
//! TCP delivers a byte stream with no message boundaries, so every
//! message is wrapped as `[len: u32 BE][body]`. The reader side
//! reassembles exactly one whole body per call, and distinguishes a
//! clean close (EOF between frames) from a torn one (EOF mid-frame).

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Upper bound on a single frame body, well above the codec's 65535
/// byte string limit but low enough that a corrupt length prefix
/// cannot provoke a giant allocation.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    let len = (body.len() as u32).to_be_bytes();
    writer
        .write_all(&len)
        .await
        .map_err(TransportError::SendFailed)?;
    writer
        .write_all(body)
        .await
        .map_err(TransportError::SendFailed)?;
    writer.flush().await.map_err(TransportError::SendFailed)
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
/// EOF inside a frame body is reported as [`TransportError::ReceiveFailed`]
/// — the peer went away mid-message.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::ReceiveFailed(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(TransportError::ReceiveFailed)?;
    Ok(Some(body))
}
