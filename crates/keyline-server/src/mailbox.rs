//! Server-side mailbox: per-directed-pair queues of opaque ciphertext.
//!
//! The server never looks inside a message. It checks the envelope (sender,
//! receiver, size) and stamps a wall-clock timestamp; ordering comes from
//! arrival, not from the timestamp.
//!
//! Delivery is at-most-once. A drain removes messages as it returns them and
//! there is no acknowledgement, so a client that crashes before persisting a
//! drained batch loses it.

use keyline_proto::{ErrorCode, MailboxMessage};
use thiserror::Error;

use crate::storage::{Storage, StorageError};

/// Default upper bound on a single ciphertext.
pub const DEFAULT_MAX_CIPHERTEXT_SIZE: usize = 64 * 1024;

/// Mailbox failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MailboxError {
    /// Sender and receiver are the same user
    #[error("cannot message yourself")]
    SelfMessage,

    /// Receiver is not registered
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    /// Zero-length ciphertext
    #[error("empty message")]
    Empty,

    /// Ciphertext above the configured limit
    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Actual size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Mailbox store failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MailboxError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SelfMessage | Self::Empty | Self::TooLarge { .. } => ErrorCode::InvalidRequest,
            Self::UnknownRecipient(_) => ErrorCode::UserNotFound,
            Self::Storage(_) => ErrorCode::Internal,
        }
    }
}

/// Validating front end over [`Storage`]'s mailbox methods.
#[derive(Debug, Clone, Copy)]
pub struct Mailbox {
    max_ciphertext_size: usize,
}

impl Mailbox {
    /// Create a mailbox accepting ciphertexts up to `max_ciphertext_size`.
    pub fn new(max_ciphertext_size: usize) -> Self {
        Self { max_ciphertext_size }
    }

    /// Append `ciphertext` to the `sender → receiver` queue.
    ///
    /// Returns the server timestamp assigned to the message.
    pub fn enqueue<S: Storage>(
        &self,
        storage: &S,
        sender: &str,
        receiver: &str,
        ciphertext: &[u8],
        now_secs: u64,
    ) -> Result<u64, MailboxError> {
        if sender == receiver {
            return Err(MailboxError::SelfMessage);
        }
        if ciphertext.is_empty() {
            return Err(MailboxError::Empty);
        }
        if ciphertext.len() > self.max_ciphertext_size {
            return Err(MailboxError::TooLarge {
                size: ciphertext.len(),
                max: self.max_ciphertext_size,
            });
        }
        if storage.load_user(receiver)?.is_none() {
            return Err(MailboxError::UnknownRecipient(receiver.to_string()));
        }

        Ok(storage.enqueue_message(sender, receiver, ciphertext, now_secs)?)
    }

    /// Remove and return everything `sender` has queued for `receiver`,
    /// oldest first.
    pub fn drain_all<S: Storage>(
        &self,
        storage: &S,
        receiver: &str,
        sender: &str,
    ) -> Result<Vec<MailboxMessage>, MailboxError> {
        if sender == receiver {
            return Err(MailboxError::SelfMessage);
        }
        Ok(storage.drain_messages(sender, receiver)?)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CIPHERTEXT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use keyline_core::UserRecord;
    use keyline_proto::Role;

    use super::*;
    use crate::storage::MemoryStorage;

    fn storage_with(names: &[&str]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        for name in names {
            storage
                .create_user(&UserRecord::new(*name, [0; 16], [0; 32], vec![], Role::User))
                .unwrap();
        }
        storage
    }

    #[test]
    fn three_in_one_drain_then_empty() {
        let storage = storage_with(&["alice", "bob"]);
        let mailbox = Mailbox::default();

        for body in [b"one", b"two", b"thr"] {
            mailbox.enqueue(&storage, "alice", "bob", body, 100).unwrap();
        }

        let drained = mailbox.drain_all(&storage, "bob", "alice").unwrap();
        let bodies: Vec<&[u8]> = drained.iter().map(|m| m.ciphertext.as_slice()).collect();
        assert_eq!(bodies, vec![&b"one"[..], b"two", b"thr"]);
        assert!(drained.iter().all(|m| m.sender == "alice"));

        assert!(mailbox.drain_all(&storage, "bob", "alice").unwrap().is_empty());
    }

    #[test]
    fn self_message_rejected() {
        let storage = storage_with(&["alice"]);
        let err = Mailbox::default().enqueue(&storage, "alice", "alice", b"hi", 1).unwrap_err();
        assert_eq!(err, MailboxError::SelfMessage);
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn unknown_recipient_rejected() {
        let storage = storage_with(&["alice"]);
        let err = Mailbox::default().enqueue(&storage, "alice", "ghost", b"hi", 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserNotFound);
        assert_eq!(storage.total_pending(), 0);
    }

    #[test]
    fn size_limits_enforced() {
        let storage = storage_with(&["alice", "bob"]);
        let mailbox = Mailbox::new(4);

        assert_eq!(
            mailbox.enqueue(&storage, "alice", "bob", b"", 1).unwrap_err(),
            MailboxError::Empty
        );
        assert_eq!(
            mailbox.enqueue(&storage, "alice", "bob", b"12345", 1).unwrap_err(),
            MailboxError::TooLarge { size: 5, max: 4 }
        );
        assert!(mailbox.enqueue(&storage, "alice", "bob", b"1234", 1).is_ok());
    }

    #[test]
    fn drain_only_touches_requested_direction() {
        let storage = storage_with(&["alice", "bob"]);
        let mailbox = Mailbox::default();

        mailbox.enqueue(&storage, "alice", "bob", b"a->b", 1).unwrap();
        mailbox.enqueue(&storage, "bob", "alice", b"b->a", 1).unwrap();

        assert_eq!(mailbox.drain_all(&storage, "bob", "alice").unwrap().len(), 1);
        assert_eq!(storage.pending_count("bob", "alice").unwrap(), 1);
    }
}
