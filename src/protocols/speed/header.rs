//! Length header framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length header on the wire
pub const HEADER_LEN: usize = 8;

/// Encode a payload length as an 8-byte big-endian header.
pub fn encode(length: u64) -> Bytes {
    let mut header = BytesMut::with_capacity(HEADER_LEN);
    header.put_u64(length);
    header.freeze()
}

/// Decode a header from the front of `input`, if enough bytes are present.
pub fn decode(mut input: &[u8]) -> Option<u64> {
    if input.len() < HEADER_LEN {
        return None;
    }
    Some(input.get_u64())
}

/// Read exactly one header from `reader`.
pub async fn read<R>(reader: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    Ok(u64::from_be_bytes(header))
}
