//! Length-prefixed UTF string frames.
//!
//! Backends speak the JVM `DataOutputStream::writeUTF` framing: a 16-bit
//! big-endian byte length followed by the string bytes. The balancer itself
//! never parses session payloads; these helpers exist for the health probe
//! frame and for test peers that emulate a backend or a client.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Payload of the liveness probe frame. Backends treat it as a no-op.
pub const PROBE_FRAME: &str = "health check";

/// Encode a string as a length-prefixed UTF frame.
///
/// # Errors
///
/// Returns `InvalidInput` if the string does not fit the 16-bit length
/// prefix.
pub fn encode_utf(s: &str) -> std::io::Result<Bytes> {
    let len = u16::try_from(s.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "string too long for UTF frame",
        )
    })?;
    let mut buf = BytesMut::with_capacity(2 + s.len());
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(buf.freeze())
}

/// Write a length-prefixed UTF frame.
///
/// # Errors
///
/// Returns an error if the string is too long for the frame or the write
/// fails.
pub async fn write_utf<W>(writer: &mut W, s: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_utf(s)?;
    writer.write_all(&frame).await
}

/// Read a length-prefixed UTF frame.
///
/// # Errors
///
/// Returns an error if the stream ends early or the bytes are not UTF-8.
pub async fn read_utf<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await?;
    let mut buf = vec![0u8; usize::from(len)];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
