//! Length-prefixed framing for [`Envelope`]s.
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of JSON.
//! Readers reject declared lengths above the configured maximum before
//! allocating, which bounds memory against malformed or hostile peers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetworkError;
use crate::message::Envelope;

/// Default maximum frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Serialize an envelope into a complete frame.
pub fn encode(envelope: &Envelope, max_len: usize) -> Result<Vec<u8>, NetworkError> {
    let payload = envelope.to_bytes()?;
    if payload.len() > max_len || u32::try_from(payload.len()).is_err() {
        return Err(NetworkError::FrameTooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one envelope as a frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
    max_len: usize,
) -> Result<(), NetworkError> {
    let frame = encode(envelope, max_len)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame payload.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// A stream that ends mid-frame yields an `Io` error with `UnexpectedEof`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>, NetworkError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(NetworkError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(NetworkError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Read and decode the next envelope.
pub async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Envelope>, NetworkError> {
    match read_frame(reader, max_len).await? {
        Some(payload) => Ok(Some(Envelope::from_bytes(&payload)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
