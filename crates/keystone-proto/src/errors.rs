//! Codec error types.

use thiserror::Error;

/// Errors from decoding handshake messages.
///
/// Codec errors are final: a message that fails to decode will fail the same
/// way on every retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Version byte names a format this build cannot read.
    #[error("unsupported version {version} (supported {minimum}..={maximum})")]
    InvalidVersion {
        /// Version the sender used.
        version: u8,
        /// Oldest version we read.
        minimum: u8,
        /// Newest version we read.
        maximum: u8,
    },

    /// Body is malformed, incomplete, or carries an invalid key.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Description of the defect.
        reason: String,
    },
}

impl ProtocolError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage { reason: reason.into() }
    }
}
