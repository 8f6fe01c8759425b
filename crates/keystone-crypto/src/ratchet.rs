//! Ratchet initialization from a completed handshake.
//!
//! Both handshake shapes end here: the bundle handshake (our base and
//! ephemeral are the same one-time prekey) and the interactive handshake
//! (fresh base and ephemeral on both sides). Roles are assigned by comparing
//! base keys, so two peers holding mirrored parameters derive the same root
//! key and mirrored chains without negotiating who is "first".

use std::fmt;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{ChainKey, CryptoError, KEY_SIZE, KeyPair, MessageKey, PublicKey};

/// Domain separation for the root key derivation.
const RATCHET_INFO: &[u8] = b"keystone ratchet v3";

/// Prefix that keeps the key derivation input disjoint from a plain DH
/// output.
const DISCONTINUITY: [u8; KEY_SIZE] = [0xFF; KEY_SIZE];

/// Inputs to ratchet initialization, seen from our side.
#[derive(Debug, Clone, Copy)]
pub struct RatchetParameters<'a> {
    /// Our base key pair (a one-time prekey on the bundle responder).
    pub our_base: &'a KeyPair,
    /// Peer's base public key.
    pub their_base: &'a PublicKey,
    /// Our ephemeral key pair; becomes our first ratchet key.
    pub our_ephemeral: &'a KeyPair,
    /// Peer's ephemeral public key.
    pub their_ephemeral: &'a PublicKey,
    /// Our long-term identity key pair.
    pub our_identity: &'a KeyPair,
    /// Peer's long-term identity key.
    pub their_identity: &'a PublicKey,
}

/// Chain state produced by initialization and advanced per message.
///
/// # Security
///
/// - **Debug Redaction**: the root key and chain keys are never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetState {
    /// Root key for future DH ratchet steps.
    pub root_key: [u8; KEY_SIZE],
    /// Our current ratchet public key.
    pub local_ratchet_key: PublicKey,
    /// Peer's current ratchet public key.
    pub remote_ratchet_key: PublicKey,
    /// Chain used to derive outbound message keys.
    pub sender_chain: Option<ChainKey>,
    /// Chain used to derive inbound message keys.
    pub receiver_chain: Option<ChainKey>,
}

impl RatchetState {
    /// Whether outbound messages can be produced.
    pub const fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    /// Take the next outbound message key, advancing the sender chain.
    ///
    /// Returns `Ok(None)` when there is no sender chain.
    pub fn next_sending_key(&mut self) -> Result<Option<MessageKey>, CryptoError> {
        let Some(chain) = self.sender_chain.as_ref() else {
            return Ok(None);
        };

        let (message_key, next) = chain.step()?;
        self.sender_chain = Some(next);
        Ok(Some(message_key))
    }

    /// Take the next inbound message key, advancing the receiver chain.
    pub fn next_receiving_key(&mut self) -> Result<Option<MessageKey>, CryptoError> {
        let Some(chain) = self.receiver_chain.as_ref() else {
            return Ok(None);
        };

        let (message_key, next) = chain.step()?;
        self.receiver_chain = Some(next);
        Ok(Some(message_key))
    }
}

impl fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("local_ratchet_key", &self.local_ratchet_key)
            .field("remote_ratchet_key", &self.remote_ratchet_key)
            .field("sender_chain", &self.sender_chain)
            .field("receiver_chain", &self.receiver_chain)
            .finish_non_exhaustive()
    }
}

/// Derive the initial ratchet state for one side of a handshake.
///
/// The side whose base key sorts lower takes the first derived chain as its
/// sender chain; the other side mirrors it.
///
/// # Errors
///
/// Returns [`CryptoError::NonContributory`] if any peer key is low-order.
pub fn initialize_session(params: &RatchetParameters<'_>) -> Result<RatchetState, CryptoError> {
    let low_side = params.our_base.public_key() < params.their_base;

    // Cross agreements are ordered so both sides feed HKDF identical bytes.
    let (identity_cross_a, identity_cross_b) = if low_side {
        (
            params.our_base.agree(params.their_identity)?,
            params.our_identity.agree(params.their_base)?,
        )
    } else {
        (
            params.our_identity.agree(params.their_base)?,
            params.our_base.agree(params.their_identity)?,
        )
    };
    let base_agreement = params.our_base.agree(params.their_base)?;
    let ephemeral_agreement = params.our_ephemeral.agree(params.their_ephemeral)?;

    let mut input = Vec::with_capacity(KEY_SIZE * 5);
    input.extend_from_slice(&DISCONTINUITY);
    input.extend_from_slice(&identity_cross_a);
    input.extend_from_slice(&identity_cross_b);
    input.extend_from_slice(&base_agreement);
    input.extend_from_slice(&ephemeral_agreement);

    let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; KEY_SIZE]), &input);
    let mut okm = [0u8; KEY_SIZE * 3];
    hkdf.expand(RATCHET_INFO, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation { reason: e.to_string() })?;

    let mut root_key = [0u8; KEY_SIZE];
    let mut low_chain = [0u8; KEY_SIZE];
    let mut high_chain = [0u8; KEY_SIZE];
    root_key.copy_from_slice(&okm[..KEY_SIZE]);
    low_chain.copy_from_slice(&okm[KEY_SIZE..KEY_SIZE * 2]);
    high_chain.copy_from_slice(&okm[KEY_SIZE * 2..]);

    let (sending, receiving) =
        if low_side { (low_chain, high_chain) } else { (high_chain, low_chain) };

    Ok(RatchetState {
        root_key,
        local_ratchet_key: *params.our_ephemeral.public_key(),
        remote_ratchet_key: *params.their_ephemeral,
        sender_chain: Some(ChainKey::new(sending)),
        receiver_chain: Some(ChainKey::new(receiving)),
    })
}
