//! Identity trust management.
//!
//! Keys are trusted on first use. A later, different key for the same peer is
//! either refused or accepted according to [`TrustPolicy`]; accepting one
//! archives every session with every device of that peer in the same batch
//! that replaces the key, so a failed write changes neither.

mod notice;
mod record;

use keystone_crypto::PublicKey;
pub use notice::{IdentityChange, IdentityNotice, NoticeOrigin, NoticeScope, describe_unverified};
pub use record::{IdentityRecord, VerifiedStatus};
use tracing::{debug, warn};

use crate::{
    Environment, PeerAddress, SessionAction, SessionError, SessionGuard, Storage, TrustPolicy,
    WriteBatch,
};

/// Group membership lookups used to fan notices out to group conversations.
pub trait GroupDirectory: Send + Sync {
    /// Identifiers of the active groups that contain `peer`.
    fn groups_containing(&self, peer: &str) -> Vec<String>;
}

/// Directory for accounts without group conversations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGroups;

impl GroupDirectory for NoGroups {
    fn groups_containing(&self, _peer: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Result of an identity mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    /// Whether a previously stored key or status was replaced.
    pub changed: bool,
    /// Notices to insert once the lock is released.
    pub actions: Vec<SessionAction>,
}

impl IdentityUpdate {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// Decides trust in peer identity keys and tracks their verification state.
#[derive(Debug, Clone)]
pub struct IdentityManager<G = NoGroups> {
    policy: TrustPolicy,
    groups: G,
}

impl<G: GroupDirectory> IdentityManager<G> {
    /// Create a manager applying `policy`, fanning notices out through
    /// `groups`.
    pub const fn new(policy: TrustPolicy, groups: G) -> Self {
        Self { policy, groups }
    }

    /// Trust policy in force.
    pub const fn policy(&self) -> TrustPolicy {
        self.policy
    }

    /// Identity on file for peer `name`.
    pub fn record<S: Storage>(
        &self,
        guard: &SessionGuard<'_, S>,
        name: &str,
    ) -> Result<Option<IdentityRecord>, SessionError> {
        guard.load_identity(name)
    }

    /// Whether `key` may be used to build a session with `address`.
    ///
    /// An unknown peer is trusted on first use and a matching key is always
    /// trusted. A key that differs from the one on file is trusted only under
    /// [`TrustPolicy::AcceptChanged`].
    pub fn validate<S: Storage>(
        &self,
        guard: &SessionGuard<'_, S>,
        address: &PeerAddress,
        key: &PublicKey,
    ) -> Result<bool, SessionError> {
        let Some(record) = guard.load_identity(&address.name)? else {
            return Ok(true);
        };
        if record.identity_key == *key {
            return Ok(true);
        }

        let trusted = self.policy == TrustPolicy::AcceptChanged;
        if !trusted {
            warn!(
                %address,
                on_file = %fingerprint(&record.identity_key),
                presented = %fingerprint(key),
                "identity key changed, refusing"
            );
        }
        Ok(trusted)
    }

    /// Record `key` as the identity of the peer behind `address`.
    ///
    /// On a key change every session with every device of the peer is
    /// archived and the key is replaced, in one atomic write. Saving a first
    /// key is not a change.
    pub fn save<S: Storage, E: Environment>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        env: &E,
        address: &PeerAddress,
        key: &PublicKey,
    ) -> Result<IdentityUpdate, SessionError> {
        let mut batch = WriteBatch::new();
        let update = self.stage_save(guard, env, address, key, &mut batch)?;
        guard.commit(batch)?;
        Ok(update)
    }

    /// Stage [`IdentityManager::save`] into `batch` without committing.
    ///
    /// Session records already staged in `batch` are archived in their staged
    /// form.
    pub(crate) fn stage_save<S: Storage, E: Environment>(
        &self,
        guard: &SessionGuard<'_, S>,
        env: &E,
        address: &PeerAddress,
        key: &PublicKey,
        batch: &mut WriteBatch,
    ) -> Result<IdentityUpdate, SessionError> {
        let name = address.name.as_str();
        let now_ms = env.wall_clock_ms();

        let Some(existing) = guard.load_identity(name)? else {
            batch.put_identity(
                name,
                IdentityRecord {
                    identity_key: *key,
                    status: VerifiedStatus::Default,
                    first_use: true,
                    created_at_ms: now_ms,
                    updated_at_ms: now_ms,
                },
            );
            debug!(%address, key = %fingerprint(key), "saved first identity key");
            return Ok(IdentityUpdate::unchanged());
        };

        if existing.identity_key == *key {
            return Ok(IdentityUpdate::unchanged());
        }

        let archived = guard.stage_archive(batch, name, None)?;
        batch.put_identity(
            name,
            IdentityRecord {
                identity_key: *key,
                status: existing.status.after_key_change(),
                first_use: false,
                created_at_ms: existing.created_at_ms,
                updated_at_ms: now_ms,
            },
        );
        warn!(
            %address,
            old = %fingerprint(&existing.identity_key),
            new = %fingerprint(key),
            archived,
            "identity key changed"
        );

        Ok(IdentityUpdate {
            changed: true,
            actions: self.notices(name, NoticeOrigin::Remote, IdentityChange::KeyChanged),
        })
    }

    /// Mark peer `name` verified.
    pub fn mark_verified<S: Storage, E: Environment>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        env: &E,
        name: &str,
        origin: NoticeOrigin,
    ) -> Result<IdentityUpdate, SessionError> {
        let Some(record) = guard.load_identity(name)? else {
            return Ok(IdentityUpdate::unchanged());
        };
        self.set_status(guard, env, name, record, VerifiedStatus::Verified, origin)
    }

    /// Clear the verification of peer `name`.
    pub fn mark_default<S: Storage, E: Environment>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        env: &E,
        name: &str,
        origin: NoticeOrigin,
    ) -> Result<IdentityUpdate, SessionError> {
        let Some(record) = guard.load_identity(name)? else {
            return Ok(IdentityUpdate::unchanged());
        };
        self.set_status(guard, env, name, record, VerifiedStatus::Default, origin)
    }

    /// Apply a verification state synced from another of our devices.
    ///
    /// Only applies when `claimed_key` is the key on file and the status
    /// actually differs; otherwise nothing is written and no notice is
    /// produced.
    pub fn reconcile_remote_claim<S: Storage, E: Environment>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        env: &E,
        name: &str,
        claimed_key: &PublicKey,
        claimed_status: VerifiedStatus,
    ) -> Result<IdentityUpdate, SessionError> {
        let Some(record) = guard.load_identity(name)? else {
            debug!(peer = name, "ignoring verification claim for unknown peer");
            return Ok(IdentityUpdate::unchanged());
        };
        if record.identity_key != *claimed_key {
            debug!(
                peer = name,
                on_file = %fingerprint(&record.identity_key),
                claimed = %fingerprint(claimed_key),
                "ignoring verification claim for another key"
            );
            return Ok(IdentityUpdate::unchanged());
        }

        self.set_status(guard, env, name, record, claimed_status, NoticeOrigin::Remote)
    }

    fn set_status<S: Storage, E: Environment>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        env: &E,
        name: &str,
        mut record: IdentityRecord,
        status: VerifiedStatus,
        origin: NoticeOrigin,
    ) -> Result<IdentityUpdate, SessionError> {
        if record.status == status {
            return Ok(IdentityUpdate::unchanged());
        }

        record.status = status;
        record.updated_at_ms = env.wall_clock_ms();
        let mut batch = WriteBatch::new();
        batch.put_identity(name, record);
        guard.commit(batch)?;
        debug!(peer = name, ?status, ?origin, "verification state changed");

        let change = match status {
            VerifiedStatus::Verified => IdentityChange::MarkedVerified,
            VerifiedStatus::Default | VerifiedStatus::Unverified => {
                IdentityChange::MarkedUnverified
            },
        };
        Ok(IdentityUpdate { changed: true, actions: self.notices(name, origin, change) })
    }

    /// One notice for the direct conversation and one per group containing
    /// the peer.
    fn notices(
        &self,
        peer: &str,
        origin: NoticeOrigin,
        change: IdentityChange,
    ) -> Vec<SessionAction> {
        let groups = self.groups.groups_containing(peer);
        let scopes = std::iter::once(NoticeScope::Direct)
            .chain(groups.into_iter().map(|group_id| NoticeScope::Group { group_id }));

        scopes
            .map(|scope| {
                SessionAction::IdentityNotice(IdentityNotice {
                    peer: peer.to_string(),
                    scope,
                    origin,
                    change,
                })
            })
            .collect()
    }
}

/// Short hex prefix of a public key for logs.
fn fingerprint(key: &PublicKey) -> String {
    hex::encode(&key.as_bytes()[..8])
}
