//! Length-prefixed CBOR framing.
//!
//! Layout on the wire: `[length: u32 BE] + [CBOR body: length bytes]`.
//!
//! # Invariants
//!
//! - The length prefix never exceeds [`MAX_FRAME_SIZE`]. Encoders refuse to
//!   produce larger frames and decoders reject them before allocating.
//! - A decoded buffer contains exactly one frame. Trailing bytes are an error
//!   because each stream carries a single message.

use bytes::BufMut;
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum CBOR body size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode `value` as a length-prefixed CBOR frame appended to `dst`.
pub fn encode_frame<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body).map_err(|e| ProtocolError::Cbor(e.to_string()))?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }

    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Read the body length announced by a frame's prefix.
///
/// Lets stream readers size their buffer before the body arrives.
pub fn frame_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size, max: MAX_FRAME_SIZE });
    }
    Ok(size)
}

/// Decode a buffer holding exactly one length-prefixed CBOR frame.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let Some((prefix, rest)) = bytes.split_first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return Err(ProtocolError::Truncated { expected: LENGTH_PREFIX_SIZE, actual: bytes.len() });
    };

    let size = frame_length(*prefix)?;
    if rest.len() < size {
        return Err(ProtocolError::Truncated { expected: size, actual: rest.len() });
    }
    if rest.len() > size {
        return Err(ProtocolError::TrailingBytes(rest.len() - size));
    }

    ciborium::from_reader(rest).map_err(|e| ProtocolError::Cbor(e.to_string()))
}

/// Encode a value as a bare CBOR body (no length prefix).
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body).map_err(|e| ProtocolError::Cbor(e.to_string()))?;
    Ok(body)
}

/// Decode a bare CBOR body (no length prefix).
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Cbor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_prefix_before_reading_body() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());

        let result: Result<String> = decode_frame(&buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn rejects_short_prefix() {
        let result: Result<String> = decode_frame(&[0, 0]);
        assert_eq!(result, Err(ProtocolError::Truncated { expected: 4, actual: 2 }));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut buf = Vec::new();
        encode_frame(&"hello".to_string(), &mut buf).unwrap();
        buf.push(0);

        let result: Result<String> = decode_frame(&buf);
        assert_eq!(result, Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn prefix_matches_body_length() {
        let mut buf = Vec::new();
        encode_frame(&vec![1u8, 2, 3], &mut buf).unwrap();

        let prefix: [u8; 4] = buf[..4].try_into().unwrap();
        assert_eq!(frame_length(prefix).unwrap(), buf.len() - 4);
    }
}
