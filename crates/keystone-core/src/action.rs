//! Side effects requested by session operations.
//!
//! Operations never send, notify or schedule anything themselves. They
//! return actions, and the caller executes them once the account lock has
//! been released (see [`crate::dispatch`]).

use keystone_proto::HandshakeMessage;

use crate::{PeerAddress, identity::IdentityNotice};

/// Work for the transport and presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send a handshake message to a peer device.
    SendHandshake {
        /// Destination device.
        address: PeerAddress,
        /// Conversation the handshake belongs to.
        thread_id: u64,
        /// Message to send.
        message: HandshakeMessage,
    },

    /// The conversation's security state changed; refresh its indicators.
    SecurityUpdate {
        /// Conversation to refresh.
        thread_id: u64,
    },

    /// A session now exists; retry messages that arrived before it did.
    DrainPendingDecrypts {
        /// Device whose queued messages can now be decrypted.
        address: PeerAddress,
    },

    /// Insert a system message about a peer's identity.
    IdentityNotice(IdentityNotice),
}

/// How an inbound or outbound handshake step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// We sent an initiate and are waiting for the response.
    Initiated,
    /// A new session is current for the address.
    Established,
    /// Bootstrap message for a session that already exists; nothing changed.
    Duplicate,
    /// Response that no longer matches our pending exchange; dropped.
    Stale,
    /// Message from an unsupported old protocol version; dropped.
    Legacy,
}

/// Result of a handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// What happened.
    pub status: HandshakeStatus,
    /// Side effects to execute after the lock is released.
    pub actions: Vec<SessionAction>,
}

impl HandshakeOutcome {
    pub(crate) const fn dropped(status: HandshakeStatus) -> Self {
        Self { status, actions: Vec::new() }
    }

    /// Whether the step produced a new current session.
    pub fn is_established(&self) -> bool {
        self.status == HandshakeStatus::Established
    }
}
