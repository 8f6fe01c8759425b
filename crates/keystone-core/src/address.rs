//! Account and peer addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device index of a peer's primary device.
pub const PRIMARY_DEVICE_ID: u32 = 1;

/// Local account that owns a set of sessions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an account name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Account name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One device of a remote peer.
///
/// Ordered by name, then device, so all devices of a peer are adjacent in
/// sorted collections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Peer identifier.
    pub name: String,
    /// Device index within the peer's account.
    pub device_id: u32,
}

impl PeerAddress {
    /// Address of `device_id` on peer `name`.
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self { name: name.into(), device_id }
    }

    /// Address of the peer's primary device.
    pub fn primary(name: impl Into<String>) -> Self {
        Self::new(name, PRIMARY_DEVICE_ID)
    }

    /// Whether this is the peer's primary device.
    pub const fn is_primary(&self) -> bool {
        self.device_id == PRIMARY_DEVICE_ID
    }

    /// Another device of the same peer.
    pub fn with_device(&self, device_id: u32) -> Self {
        Self { name: self.name.clone(), device_id }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}
