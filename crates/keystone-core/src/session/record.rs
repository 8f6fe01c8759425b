//! Session records.
//!
//! A record holds the live ratchet state for one peer device, a bounded
//! history of archived states (kept so late or reordered messages can still
//! be decrypted), and at most one in-flight interactive key exchange.
//!
//! # Serialization
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────┐
//! │ format (1 B) │ CBOR { current, previous[], pending } │
//! └──────────────┴──────────────────────────────────────┘
//! ```
//!
//! `previous` is ordered newest first.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use keystone_crypto::{KeyPair, PublicKey, RatchetState};
use keystone_proto::{CURRENT_VERSION, MINIMUM_SUPPORTED_VERSION, PreKeyMessage, RatchetMessage};
use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Archived states kept per record. The oldest is evicted first.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

const RECORD_FORMAT: u8 = 1;

/// Prekey the initiator of a bundle handshake used, kept until the peer
/// answers.
///
/// While set, outbound messages are wrapped in a [`PreKeyMessage`] so the
/// peer can build the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnacknowledgedPreKey {
    /// Peer's prekey id from the bundle.
    pub prekey_id: u32,
    /// Our base key for the handshake.
    pub base_key: PublicKey,
}

/// One ratchet session with a peer device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Protocol version the session was built with.
    pub version: u8,
    /// Our identity key at establishment.
    pub local_identity: PublicKey,
    /// Peer's identity key at establishment.
    pub remote_identity: PublicKey,
    /// Chain state.
    pub ratchet: RatchetState,
    /// Set on the bundle initiator until the peer replies.
    pub unacknowledged_prekey: Option<UnacknowledgedPreKey>,
}

impl SessionState {
    /// A freshly established current-version session.
    pub fn new(
        local_identity: PublicKey,
        remote_identity: PublicKey,
        ratchet: RatchetState,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            local_identity,
            remote_identity,
            ratchet,
            unacknowledged_prekey: None,
        }
    }

    /// Whether outbound messages can be produced.
    pub const fn has_sender_chain(&self) -> bool {
        self.ratchet.has_sender_chain()
    }

    /// Whether this state predates [`MINIMUM_SUPPORTED_VERSION`].
    pub const fn is_legacy(&self) -> bool {
        self.version < MINIMUM_SUPPORTED_VERSION
    }

    /// Wrap a ratchet message in a prekey message while the peer has not yet
    /// answered our bundle handshake.
    pub fn wrap_prekey_message(&self, message: RatchetMessage) -> Option<PreKeyMessage> {
        let unacknowledged = self.unacknowledged_prekey.as_ref()?;

        Some(PreKeyMessage {
            prekey_id: unacknowledged.prekey_id,
            base_key: unacknowledged.base_key,
            identity_key: self.local_identity,
            message,
        })
    }
}

/// Key material for an in-flight interactive key exchange.
///
/// # Security
///
/// - **Debug Redaction**: only the sequence and public keys are printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingKeyExchange {
    /// Exchange sequence both legs carry.
    pub sequence: u32,
    /// Our base key pair.
    pub base: KeyPair,
    /// Our ephemeral key pair.
    pub ephemeral: KeyPair,
    /// Our identity key pair.
    pub identity: KeyPair,
}

impl std::fmt::Debug for PendingKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingKeyExchange")
            .field("sequence", &self.sequence)
            .field("base", self.base.public_key())
            .field("ephemeral", self.ephemeral.public_key())
            .finish_non_exhaustive()
    }
}

/// Everything stored for one peer device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: VecDeque<SessionState>,
    pending: Option<PendingKeyExchange>,
}

impl SessionRecord {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// The live session state, if any.
    pub const fn current(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    /// Mutable access to the live session state, for ratchet steps.
    pub fn current_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    /// Archived states, newest first.
    pub fn previous(&self) -> impl Iterator<Item = &SessionState> {
        self.previous.iter()
    }

    /// Number of archived states.
    pub fn archived_len(&self) -> usize {
        self.previous.len()
    }

    /// Whether the live state can send.
    pub fn has_sender_chain(&self) -> bool {
        self.current.as_ref().is_some_and(SessionState::has_sender_chain)
    }

    /// Version of the live state, 0 when there is none.
    pub fn session_version(&self) -> u8 {
        self.current.as_ref().map_or(0, |state| state.version)
    }

    /// Whether the record holds a usable current-version session.
    pub fn is_active(&self) -> bool {
        self.has_sender_chain() && self.session_version() == CURRENT_VERSION
    }

    /// Whether nothing at all is stored.
    pub fn is_fresh(&self) -> bool {
        self.current.is_none() && self.previous.is_empty() && self.pending.is_none()
    }

    /// Move the live state into the archive.
    ///
    /// History is kept; only the live slot is cleared. No-op without a live
    /// state.
    pub fn archive_current_state(&mut self) {
        if let Some(state) = self.current.take() {
            self.push_archived(state);
        }
    }

    /// Archive the live state and install `state` in its place.
    pub fn promote_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current = Some(state);
    }

    /// In-flight interactive exchange, if any.
    pub const fn pending(&self) -> Option<&PendingKeyExchange> {
        self.pending.as_ref()
    }

    /// Install an in-flight exchange, replacing any previous one.
    pub fn set_pending(&mut self, pending: PendingKeyExchange) {
        self.pending = Some(pending);
    }

    /// Remove and return the in-flight exchange.
    pub fn take_pending(&mut self) -> Option<PendingKeyExchange> {
        self.pending.take()
    }

    /// Record that the peer answered on the live session, so outbound
    /// messages are no longer wrapped in prekey messages.
    ///
    /// Returns whether a prekey was still unacknowledged.
    pub fn acknowledge_prekey(&mut self) -> bool {
        self.current.as_mut().and_then(|state| state.unacknowledged_prekey.take()).is_some()
    }

    /// Drop archived states from protocol versions we no longer read.
    ///
    /// Returns how many were removed.
    pub fn purge_legacy_states(&mut self) -> usize {
        let before = self.previous.len();
        self.previous.retain(|state| !state.is_legacy());
        before - self.previous.len()
    }

    fn push_archived(&mut self, state: SessionState) {
        self.previous.push_front(state);
        self.previous.truncate(ARCHIVED_STATES_MAX_LENGTH);
    }

    /// Serialize for storage.
    pub fn encode(&self) -> Result<Bytes, StorageError> {
        let mut buf = BytesMut::new();
        buf.put_u8(RECORD_FORMAT);

        let mut writer = buf.writer();
        ciborium::ser::into_writer(self, &mut writer)
            .map_err(|e| StorageError::Corrupted { reason: format!("CBOR encode: {e}") })?;

        Ok(writer.into_inner().freeze())
    }

    /// Parse a stored record.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let Some((&format, body)) = bytes.split_first() else {
            return Err(StorageError::Corrupted { reason: "empty record".to_string() });
        };
        if format != RECORD_FORMAT {
            return Err(StorageError::Corrupted {
                reason: format!("unknown record format {format}"),
            });
        }

        let record: Self = ciborium::de::from_reader(body)
            .map_err(|e| StorageError::Corrupted { reason: format!("CBOR decode: {e}") })?;
        if record.previous.len() > ARCHIVED_STATES_MAX_LENGTH {
            return Err(StorageError::Corrupted {
                reason: format!("{} archived states", record.previous.len()),
            });
        }

        Ok(record)
    }
}
