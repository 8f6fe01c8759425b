//! Session layer configuration.

/// Prekey id that is published as the reusable last-resort prekey.
pub const DEFAULT_LAST_RESORT_PREKEY_ID: u32 = 0xFF_FFFF;

/// What to do when a peer presents an identity key that differs from the
/// one on file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustPolicy {
    /// Refuse to build sessions until the user approves the new key.
    #[default]
    RejectChanged,
    /// Accept the new key; the change is still recorded and announced.
    AcceptChanged,
}

/// Configuration for the session layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity change policy.
    pub trust_policy: TrustPolicy,
    /// Prekey id that is never deleted after use.
    pub last_resort_prekey_id: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trust_policy: TrustPolicy::default(),
            last_resort_prekey_id: DEFAULT_LAST_RESORT_PREKEY_ID,
        }
    }
}
