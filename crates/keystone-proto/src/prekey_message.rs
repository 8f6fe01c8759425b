//! Asynchronous bootstrap handshake message.

use bytes::Bytes;
use keystone_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::{
    ProtocolError, RatchetMessage, VersionByte,
    codec::{self, required, required_key},
    version::split_supported,
};

/// First message to a peer that was offline when the session was created.
///
/// References one of the recipient's published one-time prekeys and carries
/// the first ratchet message, so the recipient can build the session and
/// decrypt in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyMessage {
    /// Recipient's one-time prekey the sender used.
    pub prekey_id: u32,
    /// Sender's base key for this handshake.
    pub base_key: PublicKey,
    /// Sender's long-term identity key.
    pub identity_key: PublicKey,
    /// First ratchet message of the new session.
    pub message: RatchetMessage,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    #[serde(default)]
    prekey_id: Option<u32>,
    #[serde(default)]
    base_key: Option<Vec<u8>>,
    #[serde(default)]
    identity_key: Option<Vec<u8>>,
    #[serde(default)]
    message: Option<Vec<u8>>,
}

impl PreKeyMessage {
    /// Serialize as `[version][CBOR {prekey_id, base_key, identity_key, message}]`.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let wire = Wire {
            prekey_id: Some(self.prekey_id),
            base_key: Some(self.base_key.as_bytes().to_vec()),
            identity_key: Some(self.identity_key.as_bytes().to_vec()),
            message: Some(self.message.encode()?.to_vec()),
        };

        codec::frame(VersionByte::current(), &wire)
    }

    /// Parse a framed prekey message.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidVersion`] if the used version is newer than
    ///   we support or older than the minimum.
    /// - [`ProtocolError::InvalidMessage`] if a field is missing, a key is not
    ///   32 bytes, or the inner ratchet message does not parse.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_supported(bytes)?;
        let wire: Wire = codec::body(body)?;

        let inner = required(wire.message, "message")?;
        let message = RatchetMessage::decode(&inner).map_err(|e| match e {
            ProtocolError::InvalidMessage { reason } => {
                ProtocolError::invalid(format!("inner message: {reason}"))
            },
            ProtocolError::InvalidVersion { version, .. } => {
                ProtocolError::invalid(format!("inner message: unsupported version {version}"))
            },
        })?;

        Ok(Self {
            prekey_id: required(wire.prekey_id, "prekey_id")?,
            base_key: required_key(wire.base_key, "base_key")?,
            identity_key: required_key(wire.identity_key, "identity_key")?,
            message,
        })
    }
}
