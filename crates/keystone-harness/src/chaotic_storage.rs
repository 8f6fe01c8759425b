//! Fault-injecting storage wrapper.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use keystone_core::{
    AccountId, IdentityRecord, PeerAddress, SessionRecord, Storage, StorageError, WriteBatch,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Storage that fails commits.
///
/// A commit fails when [`ChaoticStorage::fail_next_commit`] was armed, or
/// with probability `failure_rate` drawn from a seeded stream. A failed
/// commit writes nothing and returns [`StorageError::Unavailable`]. Reads
/// always pass through.
#[derive(Clone)]
pub struct ChaoticStorage<S> {
    inner: S,
    rng: Arc<Mutex<ChaCha20Rng>>,
    failure_rate: f64,
    fail_next: Arc<AtomicBool>,
    failed: Arc<AtomicU64>,
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner`, failing commits at `failure_rate` (0.0 to 1.0).
    pub fn new(inner: S, seed: u64, failure_rate: f64) -> Self {
        Self {
            inner,
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            fail_next: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wrap `inner` without random failures.
    pub fn reliable(inner: S) -> Self {
        Self::new(inner, 0, 0.0)
    }

    /// Fail the next commit regardless of the failure rate.
    pub fn fail_next_commit(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of commits failed so far.
    pub fn failed_commits(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// The wrapped storage.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return true;
        }
        if self.failure_rate <= 0.0 {
            return false;
        }
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(self.failure_rate)
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn load_session(
        &self,
        account: &AccountId,
        address: &PeerAddress,
    ) -> Result<Option<SessionRecord>, StorageError> {
        self.inner.load_session(account, address)
    }

    fn devices_for(&self, account: &AccountId, name: &str) -> Result<Vec<u32>, StorageError> {
        self.inner.devices_for(account, name)
    }

    fn all_sessions(&self, account: &AccountId) -> Result<Vec<PeerAddress>, StorageError> {
        self.inner.all_sessions(account)
    }

    fn load_identity(
        &self,
        account: &AccountId,
        name: &str,
    ) -> Result<Option<IdentityRecord>, StorageError> {
        self.inner.load_identity(account, name)
    }

    fn commit(&self, account: &AccountId, batch: WriteBatch) -> Result<(), StorageError> {
        if self.should_fail() {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Unavailable {
                reason: format!("injected failure ({} writes dropped)", batch.len()),
            });
        }
        self.inner.commit(account, batch)
    }
}
