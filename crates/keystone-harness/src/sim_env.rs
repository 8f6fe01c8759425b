//! Seeded environment for simulation.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use keystone_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Virtual clock start, 2023-11-14T22:13:20Z.
const EPOCH_MS: u64 = 1_700_000_000_000;

/// Deterministic [`Environment`].
///
/// Randomness comes from a `ChaCha20` stream seeded at construction; time only
/// moves when [`SimEnv::advance`] is called. Clones share both, so a device
/// and everything it hands its environment to draw from one stream.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    now_ms: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            now_ms: Arc::new(AtomicU64::new(EPOCH_MS)),
        }
    }

    /// Advance the virtual clock.
    pub fn advance(&self, millis: u64) {
        self.now_ms.fetch_add(millis, Ordering::Relaxed);
    }

    /// Draw a seed for an independent child environment.
    ///
    /// Children do not share this environment's stream, so adding a device
    /// to a world does not shift the keys of the devices already in it.
    pub fn fork(&self) -> Self {
        let mut seed = [0u8; 8];
        self.random_bytes(&mut seed);
        Self::with_seed(u64::from_le_bytes(seed))
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("now_ms", &self.wall_clock_ms()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn wall_clock_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
