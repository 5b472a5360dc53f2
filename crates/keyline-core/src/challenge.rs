//! Certificate-login challenge state machine.
//!
//! Holds at most one outstanding nonce per username. Time is passed in as a
//! parameter, so the manager is pure and the expiry race can be tested
//! deterministically.
//!
//! # State Machine
//!
//! ```text
//!                  issue                    take (in time)
//! ┌─────────────┐ ──────> ┌─────────┐ ───────────────────> Verified
//! │ NoChallenge │         │ Pending │ ──┐
//! └─────────────┘         └─────────┘ <─┘ issue (Superseded)
//!        ^                     │
//!        │                     │ lifetime passes
//!        │                     v
//!        │  take / sweep  ┌─────────┐
//!        └─────────────── │ Expired │
//!                         └─────────┘
//! ```
//!
//! The signature itself is verified by the caller after [`ChallengeManager::take`]
//! hands back the nonce. `take` always removes the entry, so a failed
//! verification also consumes the challenge.
//!
//! # Atomicity
//!
//! `take` and `expire` both require `&mut self`. Whoever owns the manager
//! (the server driver, behind one mutex) therefore runs the expiry sweep and a
//! verification attempt strictly one after the other. Exactly one of them
//! observes the entry; the other sees `NoChallenge`.

use std::{collections::HashMap, ops::Sub, time::Duration};

use crate::error::ChallengeError;

/// Nonce size in bytes (256 bits).
pub const CHALLENGE_NONCE_SIZE: usize = 32;

/// Default time a nonce stays valid.
pub const DEFAULT_CHALLENGE_LIFETIME: Duration = Duration::from_secs(5);

/// Observable state of a username's challenge slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// Nothing outstanding
    NoChallenge,
    /// Nonce issued and still within its lifetime
    Pending,
    /// Nonce issued but its lifetime has passed; awaiting removal
    Expired,
}

/// Result of issuing a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// No challenge was outstanding
    Issued,
    /// An outstanding nonce was discarded in favour of the new one
    Superseded,
}

#[derive(Debug, Clone)]
struct PendingChallenge<I> {
    nonce: [u8; CHALLENGE_NONCE_SIZE],
    issued_at: I,
}

/// Outstanding challenges keyed by username.
#[derive(Debug, Clone)]
pub struct ChallengeManager<I> {
    pending: HashMap<String, PendingChallenge<I>>,
    lifetime: Duration,
}

impl<I> ChallengeManager<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty manager whose nonces live for `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        Self { pending: HashMap::new(), lifetime }
    }

    /// Configured nonce lifetime.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Record a freshly generated nonce for `username`.
    ///
    /// Any previous nonce for the same user is discarded, expired or not.
    pub fn issue(
        &mut self,
        username: &str,
        nonce: [u8; CHALLENGE_NONCE_SIZE],
        now: I,
    ) -> IssueOutcome {
        let previous = self
            .pending
            .insert(username.to_string(), PendingChallenge { nonce, issued_at: now });

        match previous {
            Some(old) if !self.is_expired(&old, now) => IssueOutcome::Superseded,
            _ => IssueOutcome::Issued,
        }
    }

    /// Remove and return the pending nonce for `username`.
    ///
    /// The entry is removed whether or not it has expired, so a nonce is
    /// handed out at most once.
    ///
    /// # Errors
    ///
    /// - `Expired`: nothing pending, or the lifetime has passed
    pub fn take(
        &mut self,
        username: &str,
        now: I,
    ) -> Result<[u8; CHALLENGE_NONCE_SIZE], ChallengeError> {
        let challenge = self.pending.remove(username).ok_or(ChallengeError::Expired)?;
        if self.is_expired(&challenge, now) {
            return Err(ChallengeError::Expired);
        }
        Ok(challenge.nonce)
    }

    /// Current state of `username`'s slot.
    pub fn state(&self, username: &str, now: I) -> ChallengeState {
        match self.pending.get(username) {
            None => ChallengeState::NoChallenge,
            Some(challenge) if self.is_expired(challenge, now) => ChallengeState::Expired,
            Some(_) => ChallengeState::Pending,
        }
    }

    /// Drop every expired entry, returning the affected usernames.
    ///
    /// Called from the driver's periodic tick so that abandoned challenges
    /// do not accumulate. Correctness never depends on it: `take` re-checks
    /// the lifetime on its own.
    pub fn expire(&mut self, now: I) -> Vec<String> {
        let lifetime = self.lifetime;
        let mut expired = Vec::new();
        self.pending.retain(|username, challenge| {
            let keep = now - challenge.issued_at < lifetime;
            if !keep {
                expired.push(username.clone());
            }
            keep
        });
        expired.sort();
        expired
    }

    /// Number of outstanding entries, expired ones included.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no entries are outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_expired(&self, challenge: &PendingChallenge<I>, now: I) -> bool {
        now - challenge.issued_at >= self.lifetime
    }
}
