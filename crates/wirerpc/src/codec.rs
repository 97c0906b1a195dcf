//! # Codec
//!
//! The translation layer between Rust values and bytes on the wire.
//!
//! ## Format
//!
//! - **Frame**: `[Len: 4b little-endian][Body: Len]`
//! - **Body**: a JSON document holding one `Frame`.
//!
//! ## Invariants
//! - **Bounded**: no frame body may exceed `MAX_FRAME_LEN`; the length is
//!   checked before any body byte is read or allocated.
//! - **Exact**: a decoded buffer must contain exactly one frame.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::error::Result;
use crate::frame::Frame;

/// A structured argument or reply value.
pub type Payload = serde_json::Value;

/// Upper bound for a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Converts any serializable value into a `Payload`.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
    Ok(serde_json::to_value(value)?)
}

/// Converts a `Payload` into a typed value.
pub fn from_payload<T: DeserializeOwned>(payload: Payload) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}

/// Serializes a frame body without the length prefix.
pub fn encode_body(frame: &Frame) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(body.len()));
    }
    Ok(body)
}

/// Deserializes a frame body (no length prefix).
pub fn decode_body(body: &[u8]) -> Result<Frame> {
    Ok(serde_json::from_slice(body)?)
}

/// Encodes a frame including its length prefix.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let body = encode_body(frame)?;
    let mut out = Vec::with_capacity(LEN_PREFIX + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a buffer holding exactly one length-prefixed frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < LEN_PREFIX {
        return Err(Error::UnexpectedEnd);
    }
    let len = frame_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    let rest = &bytes[LEN_PREFIX..];
    if rest.len() < len {
        return Err(Error::UnexpectedEnd);
    }
    if rest.len() > len {
        return Err(Error::ProtocolViolation(format!(
            "{} trailing bytes after frame",
            rest.len() - len
        )));
    }
    decode_body(rest)
}

/// Writes one frame to the stream and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the raw body of one frame from the stream.
///
/// Kept separate from decoding so a receiver can still recover the sequence
/// number of a body that fails to decode.
pub async fn read_body<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX];
    reader.read_exact(&mut prefix).await?;
    let len = frame_len(prefix)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Reads and decodes one frame from the stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let body = read_body(reader).await?;
    decode_body(&body)
}

fn frame_len(prefix: [u8; LEN_PREFIX]) -> Result<usize> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(len));
    }
    Ok(len)
}
