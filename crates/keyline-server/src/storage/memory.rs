#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use keyline_core::UserRecord;
use keyline_proto::MailboxMessage;

use super::{Storage, StorageError};

/// In-memory storage for tests, simulation and throwaway servers.
///
/// All state sits behind one `Arc<Mutex<>>`, so every trait method is atomic
/// with respect to every other. Uses `lock().expect()`, which panics if the
/// mutex is poisoned; acceptable for test code.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Records by username
    users: HashMap<String, UserRecord>,

    /// Usernames in registration order
    order: Vec<String>,

    /// Pending messages keyed by (sender, receiver), oldest first
    mailboxes: HashMap<(String, String), Vec<MailboxMessage>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Number of registered users.
    #[allow(clippy::expect_used)]
    pub fn user_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").users.len()
    }

    /// Total undrained messages across all mailboxes.
    #[allow(clippy::expect_used)]
    pub fn total_pending(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.mailboxes.values().map(Vec::len).sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    #[allow(clippy::expect_used)]
    fn load_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").users.get(username).cloned())
    }

    #[allow(clippy::expect_used)]
    fn put_user(&self, record: &UserRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.users.insert(record.username.clone(), record.clone()).is_none() {
            inner.order.push(record.username.clone());
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn create_user(&self, record: &UserRecord) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.users.contains_key(&record.username) {
            return Ok(false);
        }
        inner.users.insert(record.username.clone(), record.clone());
        inner.order.push(record.username.clone());
        Ok(true)
    }

    #[allow(clippy::expect_used)]
    fn list_usernames(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").order.clone())
    }

    #[allow(clippy::expect_used)]
    fn enqueue_message(
        &self,
        sender: &str,
        receiver: &str,
        ciphertext: &[u8],
        now_secs: u64,
    ) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let mailbox =
            inner.mailboxes.entry((sender.to_string(), receiver.to_string())).or_default();

        let timestamp = mailbox.last().map_or(now_secs, |last| last.timestamp.max(now_secs));
        mailbox.push(MailboxMessage {
            sender: sender.to_string(),
            ciphertext: ciphertext.to_vec(),
            timestamp,
        });

        Ok(timestamp)
    }

    #[allow(clippy::expect_used)]
    fn drain_messages(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<MailboxMessage>, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .mailboxes
            .remove(&(sender.to_string(), receiver.to_string()))
            .unwrap_or_default())
    }

    #[allow(clippy::expect_used)]
    fn pending_count(&self, sender: &str, receiver: &str) -> Result<usize, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .mailboxes
            .get(&(sender.to_string(), receiver.to_string()))
            .map_or(0, Vec::len))
    }
}

#[cfg(test)]
mod tests {
    use keyline_proto::Role;

    use super::*;

    fn user(name: &str) -> UserRecord {
        UserRecord::new(name, [0; 16], [0; 32], vec![1, 2, 3], Role::User)
    }

    #[test]
    fn create_user_refuses_duplicates() {
        let storage = MemoryStorage::new();
        assert!(storage.create_user(&user("alice")).unwrap());
        assert!(!storage.create_user(&user("alice")).unwrap());
        assert_eq!(storage.user_count(), 1);
    }

    #[test]
    fn registration_order_is_kept() {
        let storage = MemoryStorage::new();
        for name in ["carol", "alice", "bob"] {
            storage.create_user(&user(name)).unwrap();
        }
        storage.put_user(&user("alice")).unwrap();

        assert_eq!(storage.list_usernames().unwrap(), vec!["carol", "alice", "bob"]);
    }

    #[test]
    fn public_key_comes_from_record() {
        let storage = MemoryStorage::new();
        storage.create_user(&user("alice")).unwrap();

        assert_eq!(storage.public_key("alice").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(storage.public_key("bob").unwrap(), None);
    }

    #[test]
    fn drain_returns_all_then_nothing() {
        let storage = MemoryStorage::new();
        for i in 0..3u8 {
            storage.enqueue_message("alice", "bob", &[i], 100).unwrap();
        }

        let drained = storage.drain_messages("alice", "bob").unwrap();
        let payloads: Vec<_> = drained.iter().map(|m| m.ciphertext[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
        assert!(storage.drain_messages("alice", "bob").unwrap().is_empty());
    }

    #[test]
    fn mailboxes_are_directional() {
        let storage = MemoryStorage::new();
        storage.enqueue_message("alice", "bob", b"hi", 1).unwrap();

        assert!(storage.drain_messages("bob", "alice").unwrap().is_empty());
        assert_eq!(storage.pending_count("alice", "bob").unwrap(), 1);
    }

    #[test]
    fn timestamps_never_decrease() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.enqueue_message("alice", "bob", b"1", 50).unwrap(), 50);
        assert_eq!(storage.enqueue_message("alice", "bob", b"2", 40).unwrap(), 50);
        assert_eq!(storage.enqueue_message("alice", "bob", b"3", 60).unwrap(), 60);
    }
}
