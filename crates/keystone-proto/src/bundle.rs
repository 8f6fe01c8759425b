//! Published prekey bundle.

use bytes::Bytes;
use keystone_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::{
    ProtocolError, VersionByte,
    codec::{self, required, required_key},
    version::split_supported,
};

/// A peer's published prekey, as returned by the directory service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Device the prekey belongs to.
    pub device_id: u32,
    /// Identifier to echo back in the first prekey message.
    pub prekey_id: u32,
    /// The one-time (or last-resort) prekey.
    pub prekey: PublicKey,
    /// Device's long-term identity key.
    pub identity_key: PublicKey,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    #[serde(default)]
    device_id: Option<u32>,
    #[serde(default)]
    prekey_id: Option<u32>,
    #[serde(default)]
    prekey: Option<Vec<u8>>,
    #[serde(default)]
    identity_key: Option<Vec<u8>>,
}

impl PreKeyBundle {
    /// Serialize with the current version byte.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let wire = Wire {
            device_id: Some(self.device_id),
            prekey_id: Some(self.prekey_id),
            prekey: Some(self.prekey.as_bytes().to_vec()),
            identity_key: Some(self.identity_key.as_bytes().to_vec()),
        };

        codec::frame(VersionByte::current(), &wire)
    }

    /// Parse a framed bundle.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_supported(bytes)?;
        let wire: Wire = codec::body(body)?;

        Ok(Self {
            device_id: required(wire.device_id, "device_id")?,
            prekey_id: required(wire.prekey_id, "prekey_id")?,
            prekey: required_key(wire.prekey, "prekey")?,
            identity_key: required_key(wire.identity_key, "identity_key")?,
        })
    }
}
