//! Production environment using system time and OS randomness.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::Environment;

/// Production environment using the system clock and `getrandom`.
///
/// # Security
///
/// The RNG uses `getrandom`, which provides OS-level cryptographic
/// randomness suitable for key generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn wall_clock_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // NOTE: getrandom does not fail on supported platforms. Zeros keep
            // the call infallible; the error is logged loudly.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}
