//! Wire protocol for keyline.
//!
//! Every exchange is one request and one response. Each travels as a single
//! frame: a 4-byte big-endian length followed by a CBOR body. The transport
//! (QUIC in production, simulated TCP in tests) opens a fresh stream per
//! exchange, so there is no multiplexing or sequencing at this layer.
//!
//! The request envelope carries the caller identity the way an HTTP API would
//! carry headers: `username` and `authorization` (base64 of the raw session
//! token). Handlers that need an authenticated caller read both; public
//! handlers ignore them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chat;
pub mod errors;
pub mod frame;
pub mod request;
pub mod response;

pub use chat::ChatPayload;
pub use errors::{ProtocolError, Result};
pub use frame::{
    LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, decode_frame, encode_frame, frame_length, from_cbor,
    to_cbor,
};
pub use request::{Request, RequestBody};
pub use response::{ErrorCode, ErrorPayload, MailboxMessage, Response, Role};

/// ALPN protocol identifier negotiated on every QUIC connection.
pub const ALPN_PROTOCOL: &[u8] = b"keyline/1";
