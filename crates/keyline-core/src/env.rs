//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). The
//! simulation harness supplies a virtual clock and a seeded RNG; production
//! uses [`crate::SystemEnv`].

use std::{fmt::Debug, ops::Sub, time::Duration};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type. `std::time::Instant` in production,
    /// `tokio::time::Instant` (virtual under simulation) in tests.
    type Instant: Copy + Ord + Debug + Send + Sync + Sub<Output = Duration>;

    /// Current monotonic time. Used for challenge lifetimes.
    fn now(&self) -> Self::Instant;

    /// Seconds since the Unix epoch. Used for last-seen and mailbox
    /// timestamps, which are persisted and must survive restarts.
    fn wall_clock_secs(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fixed-size random array. Tokens, nonces, salts and keys.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
