//! Runtime error types.

use std::fmt;

use crate::storage::StorageError;

/// Errors that can occur in the QUIC runtime.
#[derive(Debug)]
pub enum RuntimeError {
    /// Configuration error (invalid bind address, missing TLS certs, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (connection failure, I/O error, etc.).
    ///
    /// May be transient (network issues) or fatal (bind address in use).
    /// Check error message for details.
    Transport(String),

    /// Protocol error (oversized frame, undecodable request, etc.).
    ///
    /// Indicates a client sent malformed data. Fatal for that stream, but the
    /// server keeps serving other streams and clients.
    Protocol(String),

    /// Storage backend could not be opened.
    ///
    /// Fatal at startup. Failures while serving are handled by the driver and
    /// never surface here.
    Storage(StorageError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for RuntimeError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<keyline_proto::ProtocolError> for RuntimeError {
    fn from(err: keyline_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
