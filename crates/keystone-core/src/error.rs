//! Session layer error types.

use keystone_crypto::CryptoError;
use keystone_proto::ProtocolError;
use thiserror::Error;

use crate::PeerAddress;

/// Errors from the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backend could not complete the operation. Nothing was written.
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },

    /// A stored record failed to decode.
    #[error("corrupted record: {reason}")]
    Corrupted {
        /// Description of the decode failure.
        reason: String,
    },

    /// Referenced prekey is not in the prekey store.
    #[error("prekey {prekey_id} not found")]
    MissingPreKey {
        /// Requested prekey id.
        prekey_id: u32,
    },
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Handshake bytes failed to decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Bootstrap message referenced a prekey we do not hold.
    #[error("no such prekey: {prekey_id}")]
    InvalidKeyId {
        /// Referenced prekey id.
        prekey_id: u32,
    },

    /// A bulk load found fewer sessions than requested.
    #[error("no session: {missing} of {requested} addresses have no record")]
    NoSession {
        /// Number of addresses requested.
        requested: usize,
        /// Number of addresses without a record.
        missing: usize,
    },

    /// Peer presented an identity key that trust policy refuses.
    #[error("untrusted identity key for {address}")]
    TrustRejected {
        /// Peer that presented the key.
        address: PeerAddress,
    },

    /// Key agreement or derivation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Returns true if the failed send may succeed when retried.
    ///
    /// Missing sessions are retryable: the caller fetches a bundle and
    /// builds one. Codec, key id, crypto and trust failures repeat on every
    /// attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoSession { .. } => true,
            Self::Storage(e) => e.is_transient(),
            Self::Protocol(_)
            | Self::InvalidKeyId { .. }
            | Self::TrustRejected { .. }
            | Self::Crypto(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_is_retryable() {
        let err = SessionError::NoSession { requested: 3, missing: 1 };
        assert!(err.is_retryable());
    }

    #[test]
    fn unavailable_storage_is_retryable() {
        let err = SessionError::from(StorageError::Unavailable { reason: "disk full".to_string() });
        assert!(err.is_retryable());
    }

    #[test]
    fn corrupted_storage_is_not_retryable() {
        let err = SessionError::from(StorageError::Corrupted { reason: "bad CBOR".to_string() });
        assert!(!err.is_retryable());
    }

    #[test]
    fn trust_rejection_is_not_retryable() {
        let err = SessionError::TrustRejected { address: PeerAddress::primary("bob") };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "untrusted identity key for bob.1");
    }

    #[test]
    fn error_display() {
        let err = SessionError::InvalidKeyId { prekey_id: 42 };
        assert_eq!(err.to_string(), "no such prekey: 42");
    }
}
