//! Interactive key-exchange message.

use bitflags::bitflags;
use bytes::Bytes;
use keystone_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::{
    ProtocolError, VersionByte,
    codec::{self, required, required_key},
    version::split_supported,
};

bitflags! {
    /// Role of a key-exchange message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyExchangeFlags: u8 {
        /// Opens a new exchange.
        const INITIATE = 0x01;
        /// Answers an initiate.
        const RESPONSE = 0x02;
        /// The responder had its own initiate in flight and reused its key
        /// material.
        const SIMULTANEOUS_INITIATE = 0x04;
    }
}

/// One leg of the interactive handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangeMessage {
    /// Exchange sequence; a response echoes the initiate's sequence.
    pub sequence: u32,
    /// Message role.
    pub flags: KeyExchangeFlags,
    /// Sender's base key.
    pub base_key: PublicKey,
    /// Sender's ephemeral key.
    pub ephemeral_key: PublicKey,
    /// Sender's long-term identity key.
    pub identity_key: PublicKey,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    #[serde(default)]
    sequence: Option<u32>,
    #[serde(default)]
    flags: Option<u8>,
    #[serde(default)]
    base_key: Option<Vec<u8>>,
    #[serde(default)]
    ephemeral_key: Option<Vec<u8>>,
    #[serde(default)]
    identity_key: Option<Vec<u8>>,
}

impl KeyExchangeMessage {
    /// Whether this message opens an exchange.
    pub const fn is_initiate(&self) -> bool {
        self.flags.contains(KeyExchangeFlags::INITIATE)
    }

    /// Whether this message answers an initiate.
    pub const fn is_response(&self) -> bool {
        self.flags.contains(KeyExchangeFlags::RESPONSE)
    }

    /// Whether this is a response sent while the responder's own initiate
    /// was in flight.
    pub const fn is_simultaneous_response(&self) -> bool {
        const SIMULTANEOUS_RESPONSE: KeyExchangeFlags =
            KeyExchangeFlags::RESPONSE.union(KeyExchangeFlags::SIMULTANEOUS_INITIATE);
        self.flags.contains(SIMULTANEOUS_RESPONSE)
    }

    /// Serialize with the current version byte.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let wire = Wire {
            sequence: Some(self.sequence),
            flags: Some(self.flags.bits()),
            base_key: Some(self.base_key.as_bytes().to_vec()),
            ephemeral_key: Some(self.ephemeral_key.as_bytes().to_vec()),
            identity_key: Some(self.identity_key.as_bytes().to_vec()),
        };

        codec::frame(VersionByte::current(), &wire)
    }

    /// Parse a framed key-exchange message.
    ///
    /// Legacy versions are rejected here; [`crate::HandshakeMessage::decode`]
    /// classifies them before calling this.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_supported(bytes)?;
        let wire: Wire = codec::body(body)?;

        let raw_flags = required(wire.flags, "flags")?;
        let flags = KeyExchangeFlags::from_bits(raw_flags)
            .ok_or_else(|| ProtocolError::invalid(format!("unknown flags {raw_flags:#04x}")))?;
        if !flags.intersects(KeyExchangeFlags::INITIATE | KeyExchangeFlags::RESPONSE) {
            return Err(ProtocolError::invalid("neither initiate nor response"));
        }

        Ok(Self {
            sequence: required(wire.sequence, "sequence")?,
            flags,
            base_key: required_key(wire.base_key, "base_key")?,
            ephemeral_key: required_key(wire.ephemeral_key, "ephemeral_key")?,
            identity_key: required_key(wire.identity_key, "identity_key")?,
        })
    }
}
