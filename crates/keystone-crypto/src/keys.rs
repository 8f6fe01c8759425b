//! Curve25519 key material.

use std::fmt;

use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// Size of public keys, secret keys and agreement outputs.
pub const KEY_SIZE: usize = 32;

/// A Curve25519 public key.
///
/// Ordering is byte-lexicographic; the ratchet uses it to assign roles
/// without an extra round trip.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a slice, returning `None` unless it is exactly
    /// [`KEY_SIZE`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; KEY_SIZE]>::try_from(bytes).ok().map(Self)
    }

    /// Raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, ..] = self.0;
        write!(f, "PublicKey({a:02x}{b:02x}{c:02x}{d:02x}..)")
    }
}

/// A Curve25519 secret scalar. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A secret key together with its public key.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl prints only the public half.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    public: PublicKey,
    secret: SecretKey,
}

impl KeyPair {
    /// Derive a key pair from 32 secret bytes.
    ///
    /// Callers supply the bytes from their entropy source.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = x25519_dalek::PublicKey::from(&secret);

        Self { public: PublicKey(public.to_bytes()), secret: SecretKey(secret.to_bytes()) }
    }

    /// The public half.
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// X25519 agreement between our secret and `their` public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NonContributory`] if `their` is a low-order
    /// point.
    pub fn agree(&self, their: &PublicKey) -> Result<[u8; KEY_SIZE], CryptoError> {
        let secret = StaticSecret::from(self.secret.0);
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(their.0));

        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        Ok(shared.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hex_literal::hex;

    use super::*;

    // RFC 7748 section 6.1
    const ALICE_SECRET: [u8; 32] =
        hex!("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
    const ALICE_PUBLIC: [u8; 32] =
        hex!("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
    const BOB_SECRET: [u8; 32] =
        hex!("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
    const BOB_PUBLIC: [u8; 32] =
        hex!("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
    const SHARED: [u8; 32] =
        hex!("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");

    #[test]
    fn rfc7748_public_keys() {
        assert_eq!(KeyPair::from_secret_bytes(ALICE_SECRET).public_key().as_bytes(), &ALICE_PUBLIC);
        assert_eq!(KeyPair::from_secret_bytes(BOB_SECRET).public_key().as_bytes(), &BOB_PUBLIC);
    }

    #[test]
    fn rfc7748_agreement() {
        let alice = KeyPair::from_secret_bytes(ALICE_SECRET);
        let bob = KeyPair::from_secret_bytes(BOB_SECRET);

        assert_eq!(alice.agree(bob.public_key()).unwrap(), SHARED);
        assert_eq!(bob.agree(alice.public_key()).unwrap(), SHARED);
    }

    #[test]
    fn low_order_point_rejected() {
        let alice = KeyPair::from_secret_bytes(ALICE_SECRET);
        let zero = PublicKey::from_bytes([0u8; 32]);

        assert_eq!(alice.agree(&zero), Err(CryptoError::NonContributory));
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(PublicKey::from_slice(&[1u8; 31]).is_none());
        assert!(PublicKey::from_slice(&[1u8; 33]).is_none());
        assert_eq!(PublicKey::from_slice(&[7u8; 32]), Some(PublicKey::from_bytes([7u8; 32])));
    }

    #[test]
    fn debug_redacts_secret() {
        let pair = KeyPair::from_secret_bytes(ALICE_SECRET);
        let rendered = format!("{pair:?}");

        assert!(rendered.contains("8520f009"));
        assert!(!rendered.contains("77076d0a"));
    }
}
