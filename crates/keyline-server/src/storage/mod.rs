//! Storage abstraction for keyline.
//!
//! One trait covers the three server-side stores: credentials (user records
//! and registration order), the public-key directory (read from user
//! records), and mailboxes. The trait is synchronous; every method is a short
//! critical section and the driver already serializes access.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
use keyline_core::UserRecord;
use keyline_proto::MailboxMessage;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// Storage abstraction for user records and mailboxes.
///
/// Must be Clone (shared by the driver and test inspectors), Send + Sync, and
/// synchronous. Implementations share state internally, so clones see the
/// same data.
///
/// # Invariants
///
/// - Usernames are unique. `create_user` never overwrites.
/// - `list_usernames` returns names in the order they were first stored.
/// - A mailbox is append-only until drained. `drain_messages` removes and
///   returns the whole list in one step: a concurrent `enqueue_message`
///   lands either in the returned list or in the next drain, never both and
///   never neither.
/// - Timestamps within one mailbox never decrease.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Look up a user. `None` if unknown.
    fn load_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Insert or overwrite a user record.
    fn put_user(&self, record: &UserRecord) -> Result<(), StorageError>;

    /// Insert a user record only if the name is free.
    ///
    /// Returns `false` (and stores nothing) if the name is taken.
    fn create_user(&self, record: &UserRecord) -> Result<bool, StorageError>;

    /// All usernames in registration order.
    fn list_usernames(&self) -> Result<Vec<String>, StorageError>;

    /// Serialized public identity for `username`. `None` if unknown.
    fn public_key(&self, username: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.load_user(username)?.map(|record| record.public_key))
    }

    /// Append to the `sender → receiver` mailbox.
    ///
    /// The stored timestamp is `now_secs`, raised if necessary to the
    /// mailbox's latest timestamp. Returns the timestamp assigned.
    fn enqueue_message(
        &self,
        sender: &str,
        receiver: &str,
        ciphertext: &[u8],
        now_secs: u64,
    ) -> Result<u64, StorageError>;

    /// Remove and return every message in the `sender → receiver` mailbox,
    /// oldest first.
    fn drain_messages(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<MailboxMessage>, StorageError>;

    /// Number of undrained messages in the `sender → receiver` mailbox.
    fn pending_count(&self, sender: &str, receiver: &str) -> Result<usize, StorageError>;
}
