//! Client error types.

use std::path::PathBuf;

use keyline_core::UsernameError;
use keyline_proto::ErrorCode;
use thiserror::Error;

use crate::chat::ConversationFault;

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced to the user-facing layer.
///
/// Three groups with different handling:
///
/// - `Rejected`: the server refused the operation (bad credentials, expired
///   token, blocked). Not retried; the caller decides whether to re-prompt.
/// - `Transport`: retryable. The coordinator never retries on its own,
///   since a blind retry could send a second key.
/// - `KeyUnwrapFailed`, `DecryptionFailed`, `KeyConflict`, `StorageCorrupt`:
///   fatal for the conversation. Recovery is an explicit
///   `Coordinator::forget_conversation`, never automatic.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server rejected the request.
    #[error("rejected: {code}: {message}")]
    Rejected {
        /// Wire error code
        code: ErrorCode,
        /// Server-supplied detail
        message: String,
    },

    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A wrapped conversation key did not open with our identity.
    #[error("could not unwrap conversation key from {peer}")]
    KeyUnwrapFailed {
        /// Conversation peer
        peer: String,
    },

    /// A message did not decrypt under the conversation key.
    #[error("could not decrypt message from {peer}")]
    DecryptionFailed {
        /// Conversation peer
        peer: String,
    },

    /// A key offer arrived for a conversation that already has a key.
    #[error("conflicting key offer from {peer}")]
    KeyConflict {
        /// Conversation peer
        peer: String,
    },

    /// Envelope artifacts exist but cannot be read. They are left in place.
    #[error("envelope at {} is corrupt: {reason}", path.display())]
    StorageCorrupt {
        /// Offending artifact
        path: PathBuf,
        /// What failed
        reason: String,
    },

    /// Sending before any key exists for the conversation.
    #[error("no shared key with {peer}")]
    NoSharedKey {
        /// Conversation peer
        peer: String,
    },

    /// Peer name unusable (also guards envelope paths).
    #[error("invalid peer name: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// The peer is the session's own user.
    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    /// Server answered with a response of the wrong kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the conversation must not continue without explicit re-keying.
    pub fn is_fatal_for_conversation(&self) -> bool {
        matches!(
            self,
            Self::KeyUnwrapFailed { .. }
                | Self::DecryptionFailed { .. }
                | Self::KeyConflict { .. }
                | Self::StorageCorrupt { .. }
        )
    }

    /// The fault to record on the conversation, for errors that stop it.
    ///
    /// `StorageCorrupt` is left out: the artifact itself already carries
    /// the failure.
    pub fn conversation_fault(&self) -> Option<ConversationFault> {
        match self {
            Self::KeyUnwrapFailed { .. } => Some(ConversationFault::KeyUnwrapFailed),
            Self::DecryptionFailed { .. } => Some(ConversationFault::DecryptionFailed),
            Self::KeyConflict { .. } => Some(ConversationFault::KeyConflict),
            _ => None,
        }
    }

    /// Error reported for a conversation stopped by `fault`.
    pub fn from_fault(fault: ConversationFault, peer: &str) -> Self {
        let peer = peer.to_string();
        match fault {
            ConversationFault::KeyUnwrapFailed => Self::KeyUnwrapFailed { peer },
            ConversationFault::DecryptionFailed => Self::DecryptionFailed { peer },
            ConversationFault::KeyConflict => Self::KeyConflict { peer },
        }
    }

    /// Error code if the server rejected the request.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(ClientError::Transport(TransportError::Timeout).is_retryable());
        assert!(
            !ClientError::Rejected { code: ErrorCode::TokenExpired, message: String::new() }
                .is_retryable()
        );
        assert!(!ClientError::KeyConflict { peer: "bob".to_string() }.is_retryable());
    }

    #[test]
    fn fatal_errors_flagged() {
        let peer = "bob".to_string();
        assert!(ClientError::DecryptionFailed { peer }.is_fatal_for_conversation());
        assert!(!ClientError::NoSharedKey { peer: "bob".to_string() }.is_fatal_for_conversation());
    }

    #[test]
    fn faults_map_back_to_their_errors() {
        for fault in [
            ConversationFault::KeyUnwrapFailed,
            ConversationFault::DecryptionFailed,
            ConversationFault::KeyConflict,
        ] {
            let err = ClientError::from_fault(fault, "bob");
            assert!(err.is_fatal_for_conversation());
            assert_eq!(err.conversation_fault(), Some(fault));
        }
        assert_eq!(ClientError::Transport(TransportError::Timeout).conversation_fault(), None);
    }
}
