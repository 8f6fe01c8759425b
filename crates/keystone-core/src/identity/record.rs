//! Identity records.

use keystone_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::StorageError;

/// How far the user has confirmed a peer's identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum VerifiedStatus {
    /// Trusted on first use, never compared out of band.
    #[default]
    Default = 0,
    /// Compared out of band and confirmed.
    Verified = 1,
    /// Was verified, then the key changed and the change is unconfirmed.
    Unverified = 2,
}

impl VerifiedStatus {
    /// Status after the peer's key changes.
    ///
    /// A peer the user ever verified stays flagged until re-verified.
    pub const fn after_key_change(self) -> Self {
        match self {
            Self::Verified | Self::Unverified => Self::Unverified,
            Self::Default => Self::Default,
        }
    }
}

/// Identity key on file for a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Peer's long-term identity key.
    pub identity_key: PublicKey,
    /// Verification state.
    pub status: VerifiedStatus,
    /// Whether the key was accepted on first contact without any prior key.
    pub first_use: bool,
    /// When the record was created, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// When the key or status last changed.
    pub updated_at_ms: u64,
}

impl IdentityRecord {
    pub(crate) fn encode(&self) -> Result<bytes::Bytes, StorageError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| StorageError::Corrupted { reason: format!("CBOR encode: {e}") })?;
        Ok(buf.into())
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| StorageError::Corrupted { reason: format!("CBOR decode: {e}") })
    }
}
