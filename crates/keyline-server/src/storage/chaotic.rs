//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails operations before they reach the wrapped store, so a failed
//! call never leaves a partial write behind. Used by chaos tests to check
//! that the driver turns every storage failure into an `Internal` response
//! and keeps serving afterwards.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use keyline_core::UserRecord;
use keyline_proto::MailboxMessage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Storage, StorageError};

const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails a fraction of
/// calls, chosen by a seeded RNG so a failing run can be replayed.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaCha8Rng>>,
    operation_count: Arc<AtomicUsize>,
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper with a fixed seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted, failed or not.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        #[allow(clippy::expect_used)]
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").gen_bool(self.failure_rate);
        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn load_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        self.roll()?;
        self.inner.load_user(username)
    }

    fn put_user(&self, record: &UserRecord) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.put_user(record)
    }

    fn create_user(&self, record: &UserRecord) -> Result<bool, StorageError> {
        self.roll()?;
        self.inner.create_user(record)
    }

    fn list_usernames(&self) -> Result<Vec<String>, StorageError> {
        self.roll()?;
        self.inner.list_usernames()
    }

    fn enqueue_message(
        &self,
        sender: &str,
        receiver: &str,
        ciphertext: &[u8],
        now_secs: u64,
    ) -> Result<u64, StorageError> {
        self.roll()?;
        self.inner.enqueue_message(sender, receiver, ciphertext, now_secs)
    }

    fn drain_messages(
        &self,
        sender: &str,
        receiver: &str,
    ) -> Result<Vec<MailboxMessage>, StorageError> {
        self.roll()?;
        self.inner.drain_messages(sender, receiver)
    }

    fn pending_count(&self, sender: &str, receiver: &str) -> Result<usize, StorageError> {
        self.roll()?;
        self.inner.pending_count(sender, receiver)
    }
}
