//! Driver error types.
//!
//! Every failure while handling one request is a `ServerError`. The driver
//! never returns these to the runtime; it turns each one into an error
//! response (and, for internal failures, an error log).

use std::fmt;

use keyline_proto::ErrorCode;

use crate::{auth::AuthError, mailbox::MailboxError, storage::StorageError};

/// Errors that can occur while handling a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerError {
    /// Authentication or authorization failed.
    ///
    /// Credential and token failures are final for the request. The caller
    /// decides whether to re-prompt; nothing here is retried.
    Auth(AuthError),

    /// Mailbox operation rejected.
    ///
    /// Input errors (self-message, unknown recipient, size) are fatal for
    /// the request. Storage failures inside are transient.
    Mailbox(MailboxError),

    /// Storage operation failed outside the authenticator and mailbox.
    ///
    /// May be transient (I/O errors) or fatal (serialization errors). The
    /// client sees `Internal`, which it may retry.
    Storage(StorageError),
}

impl ServerError {
    /// Wire error code sent back to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(err) => err.code(),
            Self::Mailbox(err) => err.code(),
            Self::Storage(_) => ErrorCode::Internal,
        }
    }

    /// Whether this failure is the server's fault rather than the caller's.
    pub fn is_internal(&self) -> bool {
        self.code() == ErrorCode::Internal
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "auth error: {err}"),
            Self::Mailbox(err) => write!(f, "mailbox error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Mailbox(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<MailboxError> for ServerError {
    fn from(err: MailboxError) -> Self {
        Self::Mailbox(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        let err = ServerError::Auth(AuthError::TokenExpired);
        assert_eq!(err.to_string(), "auth error: token expired");

        let err = ServerError::Mailbox(MailboxError::SelfMessage);
        assert_eq!(err.to_string(), "mailbox error: cannot message yourself");

        let err = ServerError::Storage(StorageError::Io("disk full".to_string()));
        assert_eq!(err.to_string(), "storage error: storage I/O error: disk full");
    }

    #[test]
    fn storage_failures_are_internal() {
        let nested = ServerError::Auth(AuthError::Storage(StorageError::Io("x".to_string())));
        assert!(nested.is_internal());
        assert!(!ServerError::Auth(AuthError::InvalidCredentials).is_internal());
    }
}
