//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Users,
//! registration order and undrained mailboxes all survive server restarts.

use std::{path::Path, sync::Arc};

use keyline_core::UserRecord;
use keyline_proto::MailboxMessage;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Storage, StorageError};

/// Table: users
/// Key: username
/// Value: CBOR-encoded `UserRecord`
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Table: `user_order`
/// Key: registration sequence number
/// Value: username
const USER_ORDER: TableDefinition<u64, &str> = TableDefinition::new("user_order");

/// Table: messages
/// Key: sender || 0x00 || receiver || 0x00 || sequence (u64 BE)
/// Value: CBOR-encoded `MailboxMessage`
///
/// Usernames never contain NUL, so the prefix uniquely names one mailbox and
/// a range scan over it visits that mailbox's messages in arrival order.
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc). Every
/// mutating method runs in a single write transaction, which Redb serializes,
/// so drain and enqueue on the same mailbox cannot interleave.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (`USERS`, `USER_ORDER`, `MESSAGES`).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io_error)?;

        let txn = db.begin_write().map_err(io_error)?;
        {
            let _ = txn.open_table(USERS).map_err(io_error)?;
            let _ = txn.open_table(USER_ORDER).map_err(io_error)?;
            let _ = txn.open_table(MESSAGES).map_err(io_error)?;
        }
        txn.commit().map_err(io_error)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn insert_user(
        txn: &redb::WriteTransaction,
        record: &UserRecord,
        append_order: bool,
    ) -> Result<(), StorageError> {
        let bytes = encode(record)?;
        {
            let mut users = txn.open_table(USERS).map_err(io_error)?;
            users.insert(record.username.as_str(), bytes.as_slice()).map_err(io_error)?;
        }

        if append_order {
            let mut order = txn.open_table(USER_ORDER).map_err(io_error)?;
            let next = match order.last().map_err(io_error)? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            order.insert(next, record.username.as_str()).map_err(io_error)?;
        }

        Ok(())
    }
}

impl Storage for RedbStorage {
    fn load_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let table = txn.open_table(USERS).map_err(io_error)?;

        let Some(value) = table.get(username).map_err(io_error)? else {
            return Ok(None);
        };
        decode(value.value()).map(Some)
    }

    fn put_user(&self, record: &UserRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;
        let exists = {
            let users = txn.open_table(USERS).map_err(io_error)?;
            users.get(record.username.as_str()).map_err(io_error)?.is_some()
        };
        Self::insert_user(&txn, record, !exists)?;
        txn.commit().map_err(io_error)
    }

    fn create_user(&self, record: &UserRecord) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;
        let exists = {
            let users = txn.open_table(USERS).map_err(io_error)?;
            users.get(record.username.as_str()).map_err(io_error)?.is_some()
        };
        if exists {
            txn.abort().map_err(io_error)?;
            return Ok(false);
        }

        Self::insert_user(&txn, record, true)?;
        txn.commit().map_err(io_error)?;
        Ok(true)
    }

    fn list_usernames(&self) -> Result<Vec<String>, StorageError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let table = txn.open_table(USER_ORDER).map_err(io_error)?;

        let mut names = Vec::with_capacity(table.len().map_err(io_error)? as usize);
        for entry in table.iter().map_err(io_error)? {
            let (_, name) = entry.map_err(io_error)?;
            names.push(name.value().to_string());
        }
        Ok(names)
    }

    fn enqueue_message(
        &self,
        sender: &str,
        receiver: &str,
        ciphertext: &[u8],
        now_secs: u64,
    ) -> Result<u64, StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;
        let timestamp = {
            let mut table = txn.open_table(MESSAGES).map_err(io_error)?;

            let (start, end) = mailbox_range(sender, receiver);
            let last = table
                .range(start.as_slice()..=end.as_slice())
                .map_err(io_error)?
                .next_back()
                .transpose()
                .map_err(io_error)?
                .map(|(key, value)| {
                    let message: MailboxMessage = decode(value.value())?;
                    Ok::<_, StorageError>((decode_sequence(key.value()), message.timestamp))
                })
                .transpose()?;

            let (sequence, timestamp) = match last {
                Some((sequence, last_timestamp)) => (sequence + 1, last_timestamp.max(now_secs)),
                None => (0, now_secs),
            };

            let message = MailboxMessage {
                sender: sender.to_string(),
                ciphertext: ciphertext.to_vec(),
                timestamp,
            };
            let key = message_key(sender, receiver, sequence);
            let bytes = encode(&message)?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io_error)?;
            timestamp
        };
        txn.commit().map_err(io_error)?;

        Ok(timestamp)
    }

    fn drain_messages(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<MailboxMessage>, StorageError> {
        let txn = self.db.begin_write().map_err(io_error)?;
        let messages = {
            let mut table = txn.open_table(MESSAGES).map_err(io_error)?;
            let (start, end) = mailbox_range(sender, receiver);

            let mut keys = Vec::new();
            let mut messages = Vec::new();
            for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io_error)? {
                let (key, value) = entry.map_err(io_error)?;
                keys.push(key.value().to_vec());
                messages.push(decode::<MailboxMessage>(value.value())?);
            }

            for key in &keys {
                table.remove(key.as_slice()).map_err(io_error)?;
            }
            messages
        };
        txn.commit().map_err(io_error)?;

        Ok(messages)
    }

    fn pending_count(&self, sender: &str, receiver: &str) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let table = txn.open_table(MESSAGES).map_err(io_error)?;
        let (start, end) = mailbox_range(sender, receiver);

        let mut count = 0;
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io_error)? {
            entry.map_err(io_error)?;
            count += 1;
        }
        Ok(count)
    }
}

fn io_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn mailbox_prefix(sender: &str, receiver: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(sender.len() + receiver.len() + 2 + 8);
    prefix.extend_from_slice(sender.as_bytes());
    prefix.push(0);
    prefix.extend_from_slice(receiver.as_bytes());
    prefix.push(0);
    prefix
}

fn message_key(sender: &str, receiver: &str, sequence: u64) -> Vec<u8> {
    let mut key = mailbox_prefix(sender, receiver);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn mailbox_range(sender: &str, receiver: &str) -> (Vec<u8>, Vec<u8>) {
    (message_key(sender, receiver, 0), message_key(sender, receiver, u64::MAX))
}

fn decode_sequence(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    if let Some(tail) = key.len().checked_sub(8).map(|start| &key[start..]) {
        bytes.copy_from_slice(tail);
    }
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use keyline_proto::Role;
    use tempfile::tempdir;

    use super::*;

    fn user(name: &str) -> UserRecord {
        UserRecord::new(name, [3; 16], [4; 32], vec![9; 64], Role::User)
    }

    #[test]
    fn user_round_trip() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        assert!(storage.create_user(&user("alice")).unwrap());
        assert_eq!(storage.load_user("alice").unwrap(), Some(user("alice")));
        assert_eq!(storage.load_user("bob").unwrap(), None);
    }

    #[test]
    fn create_user_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        let mut first = user("alice");
        first.role = Role::Admin;
        storage.create_user(&first).unwrap();
        assert!(!storage.create_user(&user("alice")).unwrap());

        assert_eq!(storage.load_user("alice").unwrap().map(|r| r.role), Some(Role::Admin));
        assert_eq!(storage.list_usernames().unwrap(), vec!["alice"]);
    }

    #[test]
    fn put_user_updates_without_reordering() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.create_user(&user("alice")).unwrap();
        storage.create_user(&user("bob")).unwrap();

        let mut alice = user("alice");
        alice.blocked = true;
        storage.put_user(&alice).unwrap();

        assert!(storage.load_user("alice").unwrap().unwrap().blocked);
        assert_eq!(storage.list_usernames().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn prefix_collision_between_mailboxes_avoided() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.enqueue_message("a", "b", b"to b", 1).unwrap();
        storage.enqueue_message("a", "bc", b"to bc", 1).unwrap();

        let drained = storage.drain_messages("a", "b").unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].ciphertext, b"to b");
        assert_eq!(storage.pending_count("a", "bc").unwrap(), 1);
    }

    #[test]
    fn drain_preserves_arrival_order_and_clears() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        for i in 0..300u32 {
            storage.enqueue_message("alice", "bob", &i.to_be_bytes(), 10).unwrap();
        }

        let drained = storage.drain_messages("alice", "bob").unwrap();
        let order: Vec<u32> = drained
            .iter()
            .map(|m| u32::from_be_bytes(m.ciphertext.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(order, (0..300).collect::<Vec<_>>());
        assert_eq!(storage.pending_count("alice", "bob").unwrap(), 0);
    }

    #[test]
    fn timestamps_clamped_per_mailbox() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        assert_eq!(storage.enqueue_message("alice", "bob", b"1", 100).unwrap(), 100);
        assert_eq!(storage.enqueue_message("alice", "bob", b"2", 90).unwrap(), 100);
        assert_eq!(storage.enqueue_message("carol", "bob", b"3", 90).unwrap(), 90);
    }
}
