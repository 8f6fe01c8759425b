//! Ratchet initialization seam.

use keystone_crypto::{CryptoError, RatchetParameters, RatchetState};

/// Derives the initial ratchet state from the six handshake keys.
///
/// Both peers call it with mirrored parameters and must arrive at matching
/// chains.
pub trait RatchetInitializer: Send + Sync {
    /// Initialize a session from the handshake keys.
    fn initialize(&self, params: &RatchetParameters<'_>) -> Result<RatchetState, CryptoError>;
}

/// Triple Diffie-Hellman initialization from `keystone-crypto`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleDh;

impl RatchetInitializer for TripleDh {
    fn initialize(&self, params: &RatchetParameters<'_>) -> Result<RatchetState, CryptoError> {
        keystone_crypto::initialize_session(params)
    }
}
