//! Per-account session store and its critical section.
//!
//! [`SessionStore::lock`] is the only way to reach session records, so every
//! load-modify-store sequence runs while the account's mutex is held. The
//! returned [`SessionGuard`] releases the lock when dropped, on every exit
//! path including `?` returns.

use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, warn};

use crate::{
    AccountId, PRIMARY_DEVICE_ID, PeerAddress, SessionError, SessionRecord, Storage, WriteBatch,
    identity::IdentityRecord,
};

/// Conceptual per-address handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No usable session and no exchange in flight.
    NoSession,
    /// We sent or answered an initiate and are waiting to complete it.
    PendingInitiate,
    /// A current-version session with a sender chain exists.
    Established,
}

/// Sessions of one local account, guarded by one mutex.
pub struct SessionStore<S> {
    account: AccountId,
    storage: S,
    lock: Mutex<()>,
}

impl<S: Storage> SessionStore<S> {
    /// Create a store for `account` over `storage`.
    pub fn new(account: AccountId, storage: S) -> Self {
        Self { account, storage, lock: Mutex::new(()) }
    }

    /// Account this store belongs to.
    pub const fn account(&self) -> &AccountId {
        &self.account
    }

    /// Backing storage.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Enter the account's critical section.
    ///
    /// Blocks until no other guard for this account is alive. A panic while
    /// holding the guard does not wedge the store: the mutex guards no data,
    /// and storage writes are atomic batches.
    pub fn lock(&self) -> SessionGuard<'_, S> {
        let held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        SessionGuard { account: &self.account, storage: &self.storage, _held: held }
    }
}

/// Proof that the account's critical section is held.
///
/// Nested operations take `&mut SessionGuard` instead of locking again.
pub struct SessionGuard<'a, S> {
    account: &'a AccountId,
    storage: &'a S,
    _held: MutexGuard<'a, ()>,
}

impl<S: Storage> SessionGuard<'_, S> {
    /// Account the guard belongs to.
    pub const fn account(&self) -> &AccountId {
        self.account
    }

    /// Load the record for `address`.
    ///
    /// Absence is not an error: it yields a fresh record without a sender
    /// chain, meaning "establish a new session".
    pub fn load(&self, address: &PeerAddress) -> Result<SessionRecord, SessionError> {
        Ok(self.storage.load_session(self.account, address)?.unwrap_or_default())
    }

    /// Load records that must all exist, in request order.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoSession`] if any address has no stored record.
    pub fn load_existing(
        &self,
        addresses: &[PeerAddress],
    ) -> Result<Vec<SessionRecord>, SessionError> {
        let loaded = self.storage.load_sessions(self.account, addresses)?;

        let missing = loaded.iter().filter(|record| record.is_none()).count();
        if loaded.len() != addresses.len() || missing > 0 {
            return Err(SessionError::NoSession {
                requested: addresses.len(),
                missing: missing.max(addresses.len().saturating_sub(loaded.len())),
            });
        }

        Ok(loaded.into_iter().flatten().collect())
    }

    /// Store `record` at `address`.
    pub fn store(
        &mut self,
        address: &PeerAddress,
        record: SessionRecord,
    ) -> Result<(), SessionError> {
        let mut batch = WriteBatch::new();
        batch.put_session(address.clone(), record);
        self.commit(batch)
    }

    /// Delete the record at `address`.
    pub fn delete(&mut self, address: &PeerAddress) -> Result<(), SessionError> {
        warn!(account = %self.account, %address, "deleting session");

        let mut batch = WriteBatch::new();
        batch.delete_session(address.clone());
        self.commit(batch)
    }

    /// Delete every device record of peer `name`. Returns how many existed.
    pub fn delete_all_for(&mut self, name: &str) -> Result<usize, SessionError> {
        let devices = self.storage.devices_for(self.account, name)?;
        warn!(
            account = %self.account,
            peer = name,
            devices = devices.len(),
            "deleting all sessions"
        );

        let mut batch = WriteBatch::new();
        for device_id in &devices {
            batch.delete_session(PeerAddress::new(name, *device_id));
        }
        self.commit(batch)?;

        Ok(devices.len())
    }

    /// Whether `address` holds an active session: a sender chain at the
    /// current protocol version.
    pub fn contains_session(&self, address: &PeerAddress) -> Result<bool, SessionError> {
        Ok(self.storage.load_session(self.account, address)?.is_some_and(|r| r.is_active()))
    }

    /// Device ids of peer `name` with a stored record, excluding the primary
    /// device.
    pub fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, SessionError> {
        let devices = self.storage.devices_for(self.account, name)?;
        Ok(devices.into_iter().filter(|device_id| *device_id != PRIMARY_DEVICE_ID).collect())
    }

    /// Addresses of the given peers that hold an active session.
    pub fn active_addresses<I>(&self, names: I) -> Result<BTreeSet<PeerAddress>, SessionError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut active = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            for device_id in self.storage.devices_for(self.account, name)? {
                let address = PeerAddress::new(name, device_id);
                if self.contains_session(&address)? {
                    active.insert(address);
                }
            }
        }

        Ok(active)
    }

    /// Conceptual handshake state of `address`.
    pub fn handshake_state(&self, address: &PeerAddress) -> Result<HandshakeState, SessionError> {
        let record = self.load(address)?;

        Ok(if record.pending().is_some() {
            HandshakeState::PendingInitiate
        } else if record.is_active() {
            HandshakeState::Established
        } else {
            HandshakeState::NoSession
        })
    }

    /// Archive the live state at `address`.
    ///
    /// Returns whether anything was archived; nothing is written otherwise.
    pub fn archive_session(&mut self, address: &PeerAddress) -> Result<bool, SessionError> {
        let Some(mut record) = self.storage.load_session(self.account, address)? else {
            return Ok(false);
        };
        if record.current().is_none() {
            return Ok(false);
        }

        record.archive_current_state();
        self.store(address, record)?;
        debug!(account = %self.account, %address, "archived session");

        Ok(true)
    }

    /// Archive every device of the same peer except `address` itself.
    ///
    /// Returns how many sessions were archived.
    pub fn archive_sibling_sessions(
        &mut self,
        address: &PeerAddress,
    ) -> Result<usize, SessionError> {
        let mut batch = WriteBatch::new();
        let archived = self.stage_archive(&mut batch, &address.name, Some(address.device_id))?;
        self.commit(batch)?;

        debug!(account = %self.account, %address, archived, "archived sibling sessions");
        Ok(archived)
    }

    /// Archive every session the account holds.
    pub fn archive_all_sessions(&mut self) -> Result<usize, SessionError> {
        let mut batch = WriteBatch::new();
        let mut archived = 0;
        for address in self.storage.all_sessions(self.account)? {
            if let Some(mut record) = self.storage.load_session(self.account, &address)?
                && record.current().is_some()
            {
                record.archive_current_state();
                batch.put_session(address, record);
                archived += 1;
            }
        }
        self.commit(batch)?;

        debug!(account = %self.account, archived, "archived all sessions");
        Ok(archived)
    }

    /// Apply `batch` atomically.
    pub fn commit(&mut self, batch: WriteBatch) -> Result<(), SessionError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.storage.commit(self.account, batch)?;
        Ok(())
    }

    /// Identity on file for peer `name`.
    pub(crate) fn load_identity(&self, name: &str) -> Result<Option<IdentityRecord>, SessionError> {
        Ok(self.storage.load_identity(self.account, name)?)
    }

    /// Record for `address` as `batch` would leave it.
    pub(crate) fn load_staged(
        &self,
        batch: &WriteBatch,
        address: &PeerAddress,
    ) -> Result<SessionRecord, SessionError> {
        match batch.staged_session(address) {
            Some(staged) => Ok(staged.cloned().unwrap_or_default()),
            None => self.load(address),
        }
    }

    /// Stage archival of every device of peer `name` into `batch`, skipping
    /// `except`. Records already staged are archived in their staged form.
    ///
    /// Returns how many live states were archived.
    pub(crate) fn stage_archive(
        &self,
        batch: &mut WriteBatch,
        name: &str,
        except: Option<u32>,
    ) -> Result<usize, SessionError> {
        let mut devices: BTreeSet<u32> =
            self.storage.devices_for(self.account, name)?.into_iter().collect();
        devices.extend(
            batch
                .sessions()
                .filter(|(address, record)| address.name == name && record.is_some())
                .map(|(address, _)| address.device_id),
        );

        let mut archived = 0;
        for device_id in devices.into_iter().filter(|device_id| Some(*device_id) != except) {
            let address = PeerAddress::new(name, device_id);
            let mut record = self.load_staged(batch, &address)?;
            if record.current().is_some() {
                record.archive_current_state();
                batch.put_session(address, record);
                archived += 1;
            }
        }

        Ok(archived)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use keystone_proto::CURRENT_VERSION;

    use super::*;
    use crate::{MemoryStorage, StorageError, session::record::tests::state};

    fn store() -> SessionStore<MemoryStorage> {
        SessionStore::new(AccountId::new("alice"), MemoryStorage::new())
    }

    fn active_record(tag: u8) -> SessionRecord {
        let mut record = SessionRecord::new();
        record.promote_state(state(tag, CURRENT_VERSION, true));
        record
    }

    fn seed(store: &SessionStore<MemoryStorage>, addresses: &[PeerAddress]) {
        let mut guard = store.lock();
        for (i, address) in addresses.iter().enumerate() {
            guard.store(address, active_record(u8::try_from(i).unwrap())).unwrap();
        }
    }

    #[test]
    fn load_unknown_address_is_fresh() {
        let store = store();
        let guard = store.lock();

        let record = guard.load(&PeerAddress::primary("nobody")).unwrap();
        assert!(!record.has_sender_chain());
        assert!(record.is_fresh());
    }

    #[test]
    fn load_existing_preserves_order() {
        let store = store();
        let addresses = vec![PeerAddress::new("bob", 2), PeerAddress::primary("bob")];
        seed(&store, &addresses);

        let guard = store.lock();
        let records = guard.load_existing(&addresses).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], active_record(0));
        assert_eq!(records[1], active_record(1));
    }

    #[test]
    fn load_existing_fails_on_missing_address() {
        let store = store();
        seed(&store, &[PeerAddress::primary("bob")]);

        let guard = store.lock();
        let result =
            guard.load_existing(&[PeerAddress::primary("bob"), PeerAddress::new("bob", 9)]);
        assert!(matches!(result, Err(SessionError::NoSession { requested: 2, missing: 1 })));
    }

    #[test]
    fn contains_session_requires_sender_chain() {
        let store = store();
        let address = PeerAddress::primary("bob");
        let mut guard = store.lock();

        let mut receiver_only = SessionRecord::new();
        receiver_only.promote_state(state(1, CURRENT_VERSION, false));
        guard.store(&address, receiver_only).unwrap();
        assert!(!guard.contains_session(&address).unwrap());

        guard.store(&address, active_record(2)).unwrap();
        assert!(guard.contains_session(&address).unwrap());
    }

    #[test]
    fn archive_session_clears_sender_chain() {
        let store = store();
        let address = PeerAddress::primary("bob");
        seed(&store, std::slice::from_ref(&address));

        let mut guard = store.lock();
        assert!(guard.archive_session(&address).unwrap());

        let record = guard.load(&address).unwrap();
        assert!(!record.has_sender_chain());
        assert_eq!(record.archived_len(), 1);
    }

    #[test]
    fn archive_missing_session_writes_nothing() {
        let store = store();
        let mut guard = store.lock();

        assert!(!guard.archive_session(&PeerAddress::primary("bob")).unwrap());
        assert_eq!(store.storage().session_count(guard.account()), 0);
    }

    #[test]
    fn sibling_archival_spares_named_device() {
        let store = store();
        let devices: Vec<_> = (1..=3).map(|d| PeerAddress::new("bob", d)).collect();
        seed(&store, &devices);

        let mut guard = store.lock();
        assert_eq!(guard.archive_sibling_sessions(&devices[1]).unwrap(), 2);

        assert!(!guard.contains_session(&devices[0]).unwrap());
        assert!(guard.contains_session(&devices[1]).unwrap());
        assert!(!guard.contains_session(&devices[2]).unwrap());
    }

    #[test]
    fn archive_all_covers_every_peer() {
        let store = store();
        seed(&store, &[PeerAddress::primary("bob"), PeerAddress::primary("carol")]);

        let mut guard = store.lock();
        assert_eq!(guard.archive_all_sessions().unwrap(), 2);
        assert!(guard.active_addresses(["bob", "carol"]).unwrap().is_empty());
        assert_eq!(store.storage().session_count(guard.account()), 2);
    }

    #[test]
    fn sub_devices_exclude_primary() {
        let store = store();
        seed(
            &store,
            &[PeerAddress::primary("bob"), PeerAddress::new("bob", 2), PeerAddress::new("bob", 5)],
        );

        let guard = store.lock();
        assert_eq!(guard.sub_device_sessions("bob").unwrap(), vec![2, 5]);
    }

    #[test]
    fn active_addresses_filters_inactive() {
        let store = store();
        seed(&store, &[PeerAddress::primary("bob"), PeerAddress::new("bob", 2)]);

        let mut guard = store.lock();
        guard.archive_session(&PeerAddress::new("bob", 2)).unwrap();

        let active = guard.active_addresses(["bob", "nobody"]).unwrap();
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec![PeerAddress::primary("bob")]);
    }

    #[test]
    fn delete_all_for_removes_every_device() {
        let store = store();
        let bob = PeerAddress::primary("bob");
        let carol = PeerAddress::primary("carol");
        seed(&store, &[bob, PeerAddress::new("bob", 2), carol]);

        let mut guard = store.lock();
        assert_eq!(guard.delete_all_for("bob").unwrap(), 2);
        assert_eq!(store.storage().session_count(guard.account()), 1);

        guard.delete(&PeerAddress::primary("carol")).unwrap();
        assert_eq!(store.storage().session_count(guard.account()), 0);
    }

    #[test]
    fn handshake_state_tracks_record() {
        let store = store();
        let address = PeerAddress::primary("bob");
        let mut guard = store.lock();
        assert_eq!(guard.handshake_state(&address).unwrap(), HandshakeState::NoSession);

        guard.store(&address, active_record(1)).unwrap();
        assert_eq!(guard.handshake_state(&address).unwrap(), HandshakeState::Established);
    }

    #[test]
    fn corrupted_record_is_storage_error() {
        let store = store();
        let address = PeerAddress::primary("bob");
        let garbage = Bytes::from_static(&[7]);
        store.storage().insert_raw_session(store.account(), address.clone(), garbage);

        let guard = store.lock();
        assert!(matches!(
            guard.load(&address),
            Err(SessionError::Storage(StorageError::Corrupted { .. }))
        ));
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let store = store();
        let devices: Vec<_> = (1..=3).map(|d| PeerAddress::new("bob", d)).collect();
        seed(&store, &devices);
        let (store, primary) = (&store, &devices[0]);

        std::thread::scope(|scope| {
            for tag in 10..14 {
                scope.spawn(move || {
                    let mut guard = store.lock();
                    let mut record = guard.load(primary).unwrap();
                    record.promote_state(state(tag, CURRENT_VERSION, true));
                    guard.store(primary, record).unwrap();
                });
                scope.spawn(move || store.lock().archive_sibling_sessions(primary).unwrap());
            }
        });

        let guard = store.lock();
        let record = guard.load(primary).unwrap();
        assert!(record.is_active());
        assert_eq!(record.archived_len(), 4);
        for sibling in &devices[1..] {
            let record = guard.load(sibling).unwrap();
            assert!(!record.has_sender_chain());
            assert_eq!(record.archived_len(), 1);
        }
    }

    #[test]
    fn guard_releases_lock_on_drop() {
        let store = store();
        drop(store.lock());

        // Would deadlock if the first guard leaked.
        let _guard = store.lock();
    }
}
