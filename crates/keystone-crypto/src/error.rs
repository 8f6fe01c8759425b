//! Cryptographic error types.

use thiserror::Error;

/// Errors from key agreement and derivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The peer key produced an all-zero shared secret (low-order point).
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,

    /// HKDF or HMAC rejected its input.
    #[error("key derivation failed: {reason}")]
    KeyDerivation {
        /// Description of the failure.
        reason: String,
    },
}
