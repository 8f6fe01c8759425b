//! Symmetric chain stepping.
//!
//! Each chain key yields exactly one message key and one successor chain
//! key. The caller replaces the chain key with its successor, so a leaked
//! chain key never exposes earlier message keys.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{CryptoError, KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

/// Key material for one message.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageKey {
    /// Symmetric key for this message.
    pub key: [u8; KEY_SIZE],
    /// Chain position the key was derived at.
    pub index: u32,
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKey").field("index", &self.index).finish_non_exhaustive()
    }
}

/// A position in a sending or receiving chain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainKey {
    key: [u8; KEY_SIZE],
    index: u32,
}

impl ChainKey {
    /// Start a chain at index 0.
    pub const fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key, index: 0 }
    }

    /// Raw chain key bytes.
    pub const fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Number of steps taken so far.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Derive this position's message key and the next chain key.
    pub fn step(&self) -> Result<(MessageKey, Self), CryptoError> {
        let message_key = MessageKey { key: self.derive(MESSAGE_KEY_SEED)?, index: self.index };
        let next = Self { key: self.derive(CHAIN_KEY_SEED)?, index: self.index.wrapping_add(1) };

        Ok((message_key, next))
    }

    fn derive(&self, seed: u8) -> Result<[u8; KEY_SIZE], CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| CryptoError::KeyDerivation { reason: e.to_string() })?;
        mac.update(&[seed]);

        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainKey").field("index", &self.index).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn step_advances_index() {
        let chain = ChainKey::new([9u8; 32]);
        let (first, chain) = chain.step().unwrap();
        let (second, chain) = chain.step().unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(chain.index(), 2);
        assert_ne!(first.key, second.key);
    }

    #[test]
    fn step_is_deterministic() {
        let a = ChainKey::new([3u8; 32]).step().unwrap();
        let b = ChainKey::new([3u8; 32]).step().unwrap();

        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn message_key_differs_from_next_chain_key() {
        let (message, next) = ChainKey::new([5u8; 32]).step().unwrap();
        assert_ne!(&message.key, next.key());
    }
}
