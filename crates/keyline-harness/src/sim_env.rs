//! Deterministic environment for simulation.
//!
//! Time comes from tokio's clock, which is virtual under turmoil and under
//! `start_paused` tests. Randomness comes from a seeded `ChaCha8` stream shared
//! by all clones, so a run is reproducible from its seed.

#![allow(clippy::disallowed_types, reason = "RNG lock is never held across an await")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use keyline_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock reading at simulation start (2024-01-01T00:00:00Z).
pub const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Simulated environment.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    start: tokio::time::Instant,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            start: tokio::time::Instant::now(),
        }
    }

    /// Virtual time elapsed since this environment was created.
    pub fn elapsed(&self) -> Duration {
        tokio::time::Instant::now() - self.start
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock_secs(&self) -> u64 {
        SIM_EPOCH_SECS + self.elapsed().as_secs()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng
            .lock()
            .expect("invariant: RNG lock holder never panics")
            .fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        assert_eq!(a.random_array::<32>(), b.random_array::<32>());
    }

    #[test]
    fn clones_share_one_stream() {
        let a = SimEnv::with_seed(7);
        let b = a.clone();
        assert_ne!(a.random_array::<32>(), b.random_array::<32>());
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_follows_virtual_time() {
        let env = SimEnv::new();
        assert_eq!(env.wall_clock_secs(), SIM_EPOCH_SECS);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(env.wall_clock_secs(), SIM_EPOCH_SECS + 90);
    }
}
