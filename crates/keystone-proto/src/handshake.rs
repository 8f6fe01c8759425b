//! Tagged handshake message.
//!
//! The transport tells us which family a payload belongs to
//! ([`HandshakeKind`]); the version byte and flags decide the rest.

use bytes::Bytes;

use crate::{
    CURRENT_VERSION, KeyExchangeMessage, MINIMUM_SUPPORTED_VERSION, PreKeyMessage, ProtocolError,
    VersionByte,
};

/// Payload family as labelled by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeKind {
    /// Asynchronous bootstrap message referencing a one-time prekey.
    PreKey,
    /// Interactive key-exchange message.
    KeyExchange,
}

/// Every handshake message the session layer handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Bootstrap message built from our published prekey bundle.
    Bundle(PreKeyMessage),
    /// Peer opens an interactive exchange.
    Initiate(KeyExchangeMessage),
    /// Peer answers our initiate.
    Response(KeyExchangeMessage),
    /// Message in a format older than [`MINIMUM_SUPPORTED_VERSION`].
    Legacy {
        /// Family the transport labelled it with.
        kind: HandshakeKind,
        /// Version the sender used.
        version: u8,
    },
}

impl HandshakeMessage {
    /// Decode a payload of the given family.
    ///
    /// Versions newer than we support fail with
    /// [`ProtocolError::InvalidVersion`]; older ones decode as
    /// [`HandshakeMessage::Legacy`] without parsing the body.
    pub fn decode(kind: HandshakeKind, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let version = VersionByte::peek(bytes)?;
        if version.is_legacy() {
            return Ok(Self::Legacy { kind, version: version.used });
        }

        match kind {
            HandshakeKind::PreKey => PreKeyMessage::decode(bytes).map(Self::Bundle),
            HandshakeKind::KeyExchange => {
                let message = KeyExchangeMessage::decode(bytes)?;
                if message.is_initiate() {
                    Ok(Self::Initiate(message))
                } else {
                    Ok(Self::Response(message))
                }
            },
        }
    }

    /// Payload family for the transport label.
    pub const fn kind(&self) -> HandshakeKind {
        match self {
            Self::Bundle(_) => HandshakeKind::PreKey,
            Self::Initiate(_) | Self::Response(_) => HandshakeKind::KeyExchange,
            Self::Legacy { kind, .. } => *kind,
        }
    }

    /// Serialize the payload.
    ///
    /// Legacy messages cannot be produced and fail with
    /// [`ProtocolError::InvalidVersion`].
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            Self::Bundle(message) => message.encode(),
            Self::Initiate(message) | Self::Response(message) => message.encode(),
            Self::Legacy { version, .. } => Err(ProtocolError::InvalidVersion {
                version: *version,
                minimum: MINIMUM_SUPPORTED_VERSION,
                maximum: CURRENT_VERSION,
            }),
        }
    }
}
