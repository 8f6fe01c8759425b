//! Storage abstraction for session and identity records.
//!
//! Reads are per key; writes go through [`Storage::commit`], which applies a
//! [`WriteBatch`] atomically. Every multi-record mutation the session layer
//! performs (identity change plus mass archival, sibling archival, handshake
//! completion) is a single batch, so a failed write never leaves some devices
//! archived and others not.
//!
//! # Invariants
//!
//! - Atomicity: a commit applies every entry or none
//! - Isolation: records of different accounts never mix

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use bytes::Bytes;

use crate::{AccountId, IdentityRecord, PeerAddress, SessionRecord, StorageError};

/// Durable keyed storage for session and identity records.
pub trait Storage: Send + Sync {
    /// Load the record for `address`, `None` if nothing is stored.
    fn load_session(
        &self,
        account: &AccountId,
        address: &PeerAddress,
    ) -> Result<Option<SessionRecord>, StorageError>;

    /// Load several records, preserving request order.
    fn load_sessions(
        &self,
        account: &AccountId,
        addresses: &[PeerAddress],
    ) -> Result<Vec<Option<SessionRecord>>, StorageError> {
        addresses.iter().map(|address| self.load_session(account, address)).collect()
    }

    /// Device ids with a stored record for peer `name`, ascending.
    fn devices_for(&self, account: &AccountId, name: &str) -> Result<Vec<u32>, StorageError>;

    /// Every address with a stored record, sorted.
    fn all_sessions(&self, account: &AccountId) -> Result<Vec<PeerAddress>, StorageError>;

    /// Load the identity on file for peer `name`.
    fn load_identity(
        &self,
        account: &AccountId,
        name: &str,
    ) -> Result<Option<IdentityRecord>, StorageError>;

    /// Apply every write in `batch`, or none of them.
    fn commit(&self, account: &AccountId, batch: WriteBatch) -> Result<(), StorageError>;
}

/// A set of writes applied atomically by [`Storage::commit`].
///
/// Later writes to the same key replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    sessions: BTreeMap<PeerAddress, Option<SessionRecord>>,
    identities: BTreeMap<String, IdentityRecord>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` at `address`.
    pub fn put_session(&mut self, address: PeerAddress, record: SessionRecord) {
        self.sessions.insert(address, Some(record));
    }

    /// Delete the record at `address`.
    pub fn delete_session(&mut self, address: PeerAddress) {
        self.sessions.insert(address, None);
    }

    /// Store the identity for peer `name`.
    pub fn put_identity(&mut self, name: impl Into<String>, record: IdentityRecord) {
        self.identities.insert(name.into(), record);
    }

    /// Record already staged for `address`.
    ///
    /// `Some(None)` means the batch deletes it.
    pub fn staged_session(&self, address: &PeerAddress) -> Option<Option<&SessionRecord>> {
        self.sessions.get(address).map(Option::as_ref)
    }

    /// Remove a staged record so it can be modified and staged again.
    pub fn take_session(&mut self, address: &PeerAddress) -> Option<SessionRecord> {
        self.sessions.remove(address).flatten()
    }

    /// Staged session writes; `None` values are deletes.
    pub fn sessions(&self) -> impl Iterator<Item = (&PeerAddress, Option<&SessionRecord>)> {
        self.sessions.iter().map(|(address, record)| (address, record.as_ref()))
    }

    /// Staged identity writes.
    pub fn identities(&self) -> impl Iterator<Item = (&str, &IdentityRecord)> {
        self.identities.iter().map(|(name, record)| (name.as_str(), record))
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.sessions.len() + self.identities.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.identities.is_empty()
    }
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<AccountId, BTreeMap<PeerAddress, Bytes>>,
    identities: HashMap<AccountId, BTreeMap<String, Bytes>>,
}

/// In-memory storage for tests and simulation.
///
/// Records are kept encoded, so every load exercises the record codec the
/// way a durable backend would. Clones share the same underlying maps.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session records stored for `account`.
    pub fn session_count(&self, account: &AccountId) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.sessions.get(account).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Overwrite the stored bytes for `address`. Used to test corruption
    /// handling.
    pub fn insert_raw_session(&self, account: &AccountId, address: PeerAddress, bytes: Bytes) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sessions.entry(account.clone()).or_default().insert(address, bytes);
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> Result<T, StorageError> {
        let mut inner = self.inner.lock().map_err(|_| StorageError::Unavailable {
            reason: "storage lock poisoned".to_string(),
        })?;
        Ok(f(&mut inner))
    }
}

impl Storage for MemoryStorage {
    fn load_session(
        &self,
        account: &AccountId,
        address: &PeerAddress,
    ) -> Result<Option<SessionRecord>, StorageError> {
        let bytes = self.with_inner(|inner| {
            inner.sessions.get(account).and_then(|sessions| sessions.get(address)).cloned()
        })?;

        bytes.map(|bytes| SessionRecord::decode(&bytes)).transpose()
    }

    fn devices_for(&self, account: &AccountId, name: &str) -> Result<Vec<u32>, StorageError> {
        self.with_inner(|inner| {
            inner.sessions.get(account).map_or_else(Vec::new, |sessions| {
                sessions
                    .keys()
                    .filter(|address| address.name == name)
                    .map(|address| address.device_id)
                    .collect()
            })
        })
    }

    fn all_sessions(&self, account: &AccountId) -> Result<Vec<PeerAddress>, StorageError> {
        self.with_inner(|inner| {
            inner
                .sessions
                .get(account)
                .map_or_else(Vec::new, |sessions| sessions.keys().cloned().collect())
        })
    }

    fn load_identity(
        &self,
        account: &AccountId,
        name: &str,
    ) -> Result<Option<IdentityRecord>, StorageError> {
        let bytes = self.with_inner(|inner| {
            inner.identities.get(account).and_then(|identities| identities.get(name)).cloned()
        })?;

        bytes.map(|bytes| IdentityRecord::decode(&bytes)).transpose()
    }

    fn commit(&self, account: &AccountId, batch: WriteBatch) -> Result<(), StorageError> {
        // Encode everything before touching the maps so a codec failure
        // leaves storage unchanged.
        let mut sessions = Vec::with_capacity(batch.sessions.len());
        for (address, record) in batch.sessions {
            sessions.push((address, record.as_ref().map(SessionRecord::encode).transpose()?));
        }
        let mut identities = Vec::with_capacity(batch.identities.len());
        for (name, record) in batch.identities {
            identities.push((name, record.encode()?));
        }

        self.with_inner(|inner| {
            let stored = inner.sessions.entry(account.clone()).or_default();
            for (address, bytes) in sessions {
                match bytes {
                    Some(bytes) => stored.insert(address, bytes),
                    None => stored.remove(&address),
                };
            }

            let stored = inner.identities.entry(account.clone()).or_default();
            for (name, bytes) in identities {
                stored.insert(name, bytes);
            }
        })
    }
}
