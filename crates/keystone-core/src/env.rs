//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (wall-clock time and randomness). Production code runs on [`SystemEnv`];
//! the simulation harness substitutes a seeded implementation so every key,
//! sequence number and timestamp is reproducible from one seed.
//!
//! # Invariants
//!
//! - Determinism: given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: implementations must not share global state
//!
//! [`SystemEnv`]: crate::SystemEnv

use keystone_crypto::{KEY_SIZE, KeyPair};

/// Abstract environment providing time and randomness.
///
/// # Security
///
/// Production implementations MUST draw `random_bytes()` from the OS entropy
/// pool. Every key pair the session layer generates comes from here.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    ///
    /// Only used for record timestamps, never for protocol decisions.
    fn wall_clock_ms(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u32`.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    /// Generates a fresh Curve25519 key pair.
    fn generate_key_pair(&self) -> KeyPair {
        let mut secret = [0u8; KEY_SIZE];
        self.random_bytes(&mut secret);
        KeyPair::from_secret_bytes(secret)
    }
}
