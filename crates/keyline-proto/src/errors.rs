//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing, encoding or decoding protocol messages.
///
/// All of these indicate a malformed or hostile peer. None are retryable on
/// the same bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame length prefix exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Claimed size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Fewer bytes than the length prefix promised.
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Bytes remain after a complete frame.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// CBOR body could not be encoded or decoded.
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// `authorization` header is not valid base64.
    #[error("malformed authorization header")]
    MalformedAuthorization,
}
