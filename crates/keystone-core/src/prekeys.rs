//! Local one-time prekeys.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use keystone_crypto::KeyPair;

use crate::{Environment, StorageError};

/// Store of the one-time prekeys this device has published.
pub trait PreKeyStore: Send + Sync {
    /// Whether prekey `prekey_id` is still held.
    fn contains(&self, prekey_id: u32) -> Result<bool, StorageError>;

    /// Load prekey `prekey_id`.
    ///
    /// # Errors
    ///
    /// [`StorageError::MissingPreKey`] if it is not held.
    fn load(&self, prekey_id: u32) -> Result<KeyPair, StorageError>;

    /// Delete prekey `prekey_id`. Deleting a missing prekey is not an error.
    fn remove(&self, prekey_id: u32) -> Result<(), StorageError>;
}

/// In-memory prekey store.
///
/// Clones share the same keys.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreKeyStore {
    keys: Arc<Mutex<BTreeMap<u32, KeyPair>>>,
}

impl MemoryPreKeyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key_pair` under `prekey_id`, replacing any previous key.
    pub fn insert(&self, prekey_id: u32, key_pair: KeyPair) -> Result<(), StorageError> {
        self.with_keys(|keys| {
            keys.insert(prekey_id, key_pair);
        })
    }

    /// Generate a fresh key pair under `prekey_id` and return it.
    pub fn generate<E: Environment>(
        &self,
        env: &E,
        prekey_id: u32,
    ) -> Result<KeyPair, StorageError> {
        let key_pair = env.generate_key_pair();
        self.insert(prekey_id, key_pair.clone())?;
        Ok(key_pair)
    }

    /// Number of prekeys held.
    pub fn len(&self) -> Result<usize, StorageError> {
        self.with_keys(|keys| keys.len())
    }

    /// Whether no prekeys are held.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.with_keys(|keys| keys.is_empty())
    }

    fn with_keys<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<u32, KeyPair>) -> T,
    ) -> Result<T, StorageError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| StorageError::Unavailable { reason: "prekey lock poisoned".to_string() })?;
        Ok(f(&mut keys))
    }
}

impl PreKeyStore for MemoryPreKeyStore {
    fn contains(&self, prekey_id: u32) -> Result<bool, StorageError> {
        self.with_keys(|keys| keys.contains_key(&prekey_id))
    }

    fn load(&self, prekey_id: u32) -> Result<KeyPair, StorageError> {
        self.with_keys(|keys| keys.get(&prekey_id).cloned())?
            .ok_or(StorageError::MissingPreKey { prekey_id })
    }

    fn remove(&self, prekey_id: u32) -> Result<(), StorageError> {
        self.with_keys(|keys| {
            keys.remove(&prekey_id);
        })
    }
}
