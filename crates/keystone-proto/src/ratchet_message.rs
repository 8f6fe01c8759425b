//! Inner ratchet message.

use bytes::Bytes;
use keystone_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::{
    ProtocolError, VersionByte,
    codec::{self, required, required_key},
    version::split_supported,
};

/// A ratchet-encrypted message.
///
/// Handshake processing only reads `sender_ephemeral`; the counters and
/// ciphertext are carried through for the message layer.
#[derive(Clone, PartialEq, Eq)]
pub struct RatchetMessage {
    /// Sender's current ratchet public key.
    pub sender_ephemeral: PublicKey,
    /// Position in the sender chain.
    pub counter: u32,
    /// Length of the sender's previous chain.
    pub previous_counter: u32,
    /// Encrypted body.
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    #[serde(default)]
    sender_ephemeral: Option<Vec<u8>>,
    #[serde(default)]
    counter: Option<u32>,
    #[serde(default)]
    previous_counter: Option<u32>,
    #[serde(default)]
    ciphertext: Option<Vec<u8>>,
}

impl RatchetMessage {
    /// Serialize with the current version byte.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let wire = Wire {
            sender_ephemeral: Some(self.sender_ephemeral.as_bytes().to_vec()),
            counter: Some(self.counter),
            previous_counter: Some(self.previous_counter),
            ciphertext: Some(self.ciphertext.clone()),
        };

        codec::frame(VersionByte::current(), &wire)
    }

    /// Parse a framed ratchet message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_supported(bytes)?;
        let wire: Wire = codec::body(body)?;

        Ok(Self {
            sender_ephemeral: required_key(wire.sender_ephemeral, "sender_ephemeral")?,
            counter: required(wire.counter, "counter")?,
            previous_counter: required(wire.previous_counter, "previous_counter")?,
            ciphertext: required(wire.ciphertext, "ciphertext")?,
        })
    }
}

impl std::fmt::Debug for RatchetMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetMessage")
            .field("sender_ephemeral", &self.sender_ephemeral)
            .field("counter", &self.counter)
            .field("previous_counter", &self.previous_counter)
            .field("ciphertext", &format!("<{} bytes>", self.ciphertext.len()))
            .finish()
    }
}
