//! Version byte packing.

use crate::ProtocolError;

/// Newest message format this build writes and reads.
pub const CURRENT_VERSION: u8 = 3;

/// Oldest message format this build reads. Anything older is legacy.
pub const MINIMUM_SUPPORTED_VERSION: u8 = 2;

/// Decoded version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionByte {
    /// Format version the message was written with (high nibble).
    pub used: u8,
    /// Oldest version the sender accepts (low nibble).
    pub minimum: u8,
}

impl VersionByte {
    /// Version byte for messages we originate.
    pub const fn current() -> Self {
        Self { used: CURRENT_VERSION, minimum: MINIMUM_SUPPORTED_VERSION }
    }

    /// Pack into a single byte.
    pub const fn to_byte(self) -> u8 {
        (self.used << 4) | (self.minimum & 0x0F)
    }

    /// Unpack a single byte.
    pub const fn from_byte(byte: u8) -> Self {
        Self { used: byte >> 4, minimum: byte & 0x0F }
    }

    /// Whether the message predates [`MINIMUM_SUPPORTED_VERSION`].
    pub const fn is_legacy(self) -> bool {
        self.used < MINIMUM_SUPPORTED_VERSION
    }

    /// Read the version byte at the front of `bytes`.
    ///
    /// Fails closed on empty input and on versions newer than
    /// [`CURRENT_VERSION`]. Legacy versions are returned as-is; each message
    /// type decides whether it reads them.
    pub fn peek(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let first = bytes.first().ok_or_else(|| ProtocolError::invalid("empty message"))?;
        let version = Self::from_byte(*first);

        if version.used > CURRENT_VERSION {
            return Err(version.unsupported());
        }

        Ok(version)
    }

    pub(crate) const fn unsupported(self) -> ProtocolError {
        ProtocolError::InvalidVersion {
            version: self.used,
            minimum: MINIMUM_SUPPORTED_VERSION,
            maximum: CURRENT_VERSION,
        }
    }
}

/// Split off the version byte, rejecting legacy and future versions.
pub(crate) fn split_supported(bytes: &[u8]) -> Result<(VersionByte, &[u8]), ProtocolError> {
    let version = VersionByte::peek(bytes)?;
    if version.is_legacy() {
        return Err(version.unsupported());
    }

    Ok((version, &bytes[1..]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn current_packs_high_and_low_nibbles() {
        assert_eq!(VersionByte::current().to_byte(), 0x32);
        assert_eq!(VersionByte::from_byte(0x32), VersionByte::current());
    }

    #[test]
    fn peek_rejects_future_version() {
        let result = VersionByte::peek(&[0x42, 0x00]);
        assert!(matches!(result, Err(ProtocolError::InvalidVersion { version: 4, .. })));
    }

    #[test]
    fn peek_accepts_legacy() {
        let version = VersionByte::peek(&[0x11]).unwrap();
        assert!(version.is_legacy());
    }

    #[test]
    fn split_supported_rejects_legacy() {
        assert!(matches!(split_supported(&[0x11]), Err(ProtocolError::InvalidVersion { .. })));
    }

    #[test]
    fn empty_is_invalid_message() {
        assert!(matches!(VersionByte::peek(&[]), Err(ProtocolError::InvalidMessage { .. })));
    }
}
