//! Key-exchange processing.
//!
//! Drives both handshake families to an established session:
//!
//! - **Bundle**: asynchronous. The initiator fetches the peer's
//!   [`PreKeyBundle`] and builds a session locally; the first message it
//!   sends carries a [`PreKeyMessage`] that lets the peer build the matching
//!   session from the referenced one-time prekey.
//! - **Interactive**: both sides are online and exchange an initiate and a
//!   response. Two initiates that cross in flight converge on a single
//!   session: each side answers the other's initiate with its own pending
//!   key material, flagged as a simultaneous-initiate response.
//!
//! # State per address
//!
//! ```text
//! NoSession ──initiate()──▶ PendingInitiate ──response──▶ Established
//!     │                          │
//!     │                          └──peer initiate (simultaneous)──▶ Established
//!     └──bundle / peer initiate──────────────────────────────────▶ Established
//! ```
//!
//! Every step runs under the caller's [`SessionGuard`] and commits its writes
//! (session record, identity record, archival caused by an identity change)
//! in one batch. Side effects come back as [`SessionAction`]s.

use keystone_crypto::{KeyPair, PublicKey, RatchetParameters};
use keystone_proto::{
    HandshakeMessage, KeyExchangeFlags, KeyExchangeMessage, PreKeyBundle, PreKeyMessage,
    ProtocolError,
};
use tracing::{debug, info, warn};

use crate::{
    Environment, HandshakeOutcome, HandshakeStatus, PeerAddress, PendingKeyExchange, PreKeyStore,
    RatchetInitializer, SessionAction, SessionConfig, SessionError, SessionGuard, SessionRecord,
    SessionState, Storage, TripleDh, UnacknowledgedPreKey, WriteBatch,
    identity::{GroupDirectory, IdentityManager, NoGroups},
};

/// Processes handshake messages for one local account.
pub struct KeyExchangeProcessor<E, P, G = NoGroups, R = TripleDh> {
    env: E,
    config: SessionConfig,
    prekeys: P,
    identity: IdentityManager<G>,
    ratchet: R,
    local_identity: KeyPair,
}

impl<E, P, G> KeyExchangeProcessor<E, P, G>
where
    E: Environment,
    P: PreKeyStore,
    G: GroupDirectory,
{
    /// Create a processor for the account owning `local_identity`.
    pub fn new(
        env: E,
        config: SessionConfig,
        prekeys: P,
        groups: G,
        local_identity: KeyPair,
    ) -> Self {
        let identity = IdentityManager::new(config.trust_policy, groups);
        Self { env, config, prekeys, identity, ratchet: TripleDh, local_identity }
    }
}

impl<E, P, G, R> KeyExchangeProcessor<E, P, G, R>
where
    E: Environment,
    P: PreKeyStore,
    G: GroupDirectory,
    R: RatchetInitializer,
{
    /// Replace the ratchet initialization primitive.
    pub fn with_ratchet<R2: RatchetInitializer>(
        self,
        ratchet: R2,
    ) -> KeyExchangeProcessor<E, P, G, R2> {
        KeyExchangeProcessor {
            env: self.env,
            config: self.config,
            prekeys: self.prekeys,
            identity: self.identity,
            ratchet,
            local_identity: self.local_identity,
        }
    }

    /// Our long-term identity key.
    pub const fn local_identity_key(&self) -> &PublicKey {
        self.local_identity.public_key()
    }

    /// Identity manager sharing this processor's trust policy.
    pub const fn identity(&self) -> &IdentityManager<G> {
        &self.identity
    }

    /// Environment the processor draws keys and time from.
    pub const fn env(&self) -> &E {
        &self.env
    }

    /// Local prekey store.
    pub const fn prekeys(&self) -> &P {
        &self.prekeys
    }

    /// Process any inbound handshake message from `address`.
    pub fn process<S: Storage>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        address: &PeerAddress,
        thread_id: u64,
        message: &HandshakeMessage,
    ) -> Result<HandshakeOutcome, SessionError> {
        match message {
            HandshakeMessage::Bundle(message) => {
                self.process_bundle(guard, address, thread_id, message)
            },
            HandshakeMessage::Initiate(message) | HandshakeMessage::Response(message) => {
                self.process_key_exchange(guard, address, thread_id, message)
            },
            HandshakeMessage::Legacy { kind, version } => {
                warn!(%address, ?kind, version, "dropping legacy handshake");
                Ok(HandshakeOutcome::dropped(HandshakeStatus::Legacy))
            },
        }
    }

    /// Build the session a peer started from one of our published prekeys.
    ///
    /// A message for a prekey we no longer hold is a benign duplicate when a
    /// session with the sender already exists.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidKeyId`] if the prekey is unknown and no session
    ///   exists
    /// - [`SessionError::TrustRejected`] if the sender's identity is refused
    pub fn process_bundle<S: Storage>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        address: &PeerAddress,
        thread_id: u64,
        message: &PreKeyMessage,
    ) -> Result<HandshakeOutcome, SessionError> {
        let prekey_id = message.prekey_id;
        if !self.prekeys.contains(prekey_id)? {
            if guard.contains_session(address)? {
                warn!(%address, prekey_id, "prekey already consumed, keeping existing session");
                return Ok(HandshakeOutcome::dropped(HandshakeStatus::Duplicate));
            }
            return Err(SessionError::InvalidKeyId { prekey_id });
        }

        self.require_trust(guard, address, &message.identity_key)?;

        let prekey = self.prekeys.load(prekey_id)?;
        let ratchet = self.ratchet.initialize(&RatchetParameters {
            our_base: &prekey,
            their_base: &message.base_key,
            our_ephemeral: &prekey,
            their_ephemeral: &message.message.sender_ephemeral,
            our_identity: &self.local_identity,
            their_identity: &message.identity_key,
        })?;
        let state =
            SessionState::new(*self.local_identity.public_key(), message.identity_key, ratchet);

        let record = guard.load(address)?;
        let mut actions = self.commit_session(guard, address, record, state)?;

        if prekey_id == self.config.last_resort_prekey_id {
            debug!(%address, prekey_id, "keeping last-resort prekey");
        } else if let Err(e) = self.prekeys.remove(prekey_id) {
            warn!(%address, prekey_id, error = %e, "failed to remove consumed prekey");
        }

        info!(%address, prekey_id, "session established from prekey message");
        actions.push(SessionAction::SecurityUpdate { thread_id });
        Ok(HandshakeOutcome { status: HandshakeStatus::Established, actions })
    }

    /// Build a session toward an offline peer from its published bundle.
    ///
    /// The bundle must have been fetched before the guard was taken. Until
    /// the peer answers, outbound messages on the new session are wrapped in
    /// prekey messages (see [`SessionState::wrap_prekey_message`]).
    ///
    /// # Errors
    ///
    /// - [`SessionError::Protocol`] if the bundle is for another device
    /// - [`SessionError::TrustRejected`] if the bundle's identity is refused
    pub fn process_prekey_bundle<S: Storage>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        address: &PeerAddress,
        thread_id: u64,
        bundle: &PreKeyBundle,
    ) -> Result<HandshakeOutcome, SessionError> {
        if bundle.device_id != address.device_id {
            return Err(ProtocolError::InvalidMessage {
                reason: format!("bundle for device {} sent to {address}", bundle.device_id),
            }
            .into());
        }

        self.require_trust(guard, address, &bundle.identity_key)?;

        let base = self.env.generate_key_pair();
        let ephemeral = self.env.generate_key_pair();
        let ratchet = self.ratchet.initialize(&RatchetParameters {
            our_base: &base,
            their_base: &bundle.prekey,
            our_ephemeral: &ephemeral,
            their_ephemeral: &bundle.prekey,
            our_identity: &self.local_identity,
            their_identity: &bundle.identity_key,
        })?;
        let mut state =
            SessionState::new(*self.local_identity.public_key(), bundle.identity_key, ratchet);
        state.unacknowledged_prekey = Some(UnacknowledgedPreKey {
            prekey_id: bundle.prekey_id,
            base_key: *base.public_key(),
        });

        let record = guard.load(address)?;
        let mut actions = self.commit_session(guard, address, record, state)?;

        info!(%address, prekey_id = bundle.prekey_id, "session established from bundle");
        actions.push(SessionAction::SecurityUpdate { thread_id });
        Ok(HandshakeOutcome { status: HandshakeStatus::Established, actions })
    }

    /// Open an interactive exchange with `address`.
    ///
    /// Any exchange already pending for the address is replaced.
    pub fn initiate<S: Storage>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        address: &PeerAddress,
        thread_id: u64,
    ) -> Result<HandshakeOutcome, SessionError> {
        let mut record = guard.load(address)?;
        if let Some(previous) = record.pending() {
            warn!(%address, sequence = previous.sequence, "replacing pending key exchange");
        }

        let sequence = match self.env.random_u32() {
            0 => 1,
            sequence => sequence,
        };
        let pending = PendingKeyExchange {
            sequence,
            base: self.env.generate_key_pair(),
            ephemeral: self.env.generate_key_pair(),
            identity: self.local_identity.clone(),
        };
        let message = exchange_message(&pending, KeyExchangeFlags::INITIATE);
        record.set_pending(pending);
        guard.store(address, record)?;

        debug!(%address, sequence, "key exchange initiated");
        Ok(HandshakeOutcome {
            status: HandshakeStatus::Initiated,
            actions: vec![SessionAction::SendHandshake {
                address: address.clone(),
                thread_id,
                message: HandshakeMessage::Initiate(message),
            }],
        })
    }

    /// Process an interactive initiate or response from `address`.
    ///
    /// An initiate is answered and completed at once; a response completes
    /// our pending exchange. A response that matches no pending exchange is
    /// stale and dropped before the sender's identity is looked at.
    ///
    /// # Errors
    ///
    /// [`SessionError::TrustRejected`] if the sender's identity is refused.
    pub fn process_key_exchange<S: Storage>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        address: &PeerAddress,
        thread_id: u64,
        message: &KeyExchangeMessage,
    ) -> Result<HandshakeOutcome, SessionError> {
        let mut record = guard.load(address)?;
        let sequence = message.sequence;

        let mut actions = Vec::new();
        let pending = if message.is_initiate() {
            self.require_trust(guard, address, &message.identity_key)?;

            let (pending, flags) = match record.take_pending() {
                None => {
                    debug!(%address, sequence, "answering key exchange");
                    let pending = PendingKeyExchange {
                        sequence,
                        base: self.env.generate_key_pair(),
                        ephemeral: self.env.generate_key_pair(),
                        identity: self.local_identity.clone(),
                    };
                    (pending, KeyExchangeFlags::RESPONSE)
                },
                Some(ours) => {
                    debug!(
                        %address,
                        ours = ours.sequence,
                        theirs = sequence,
                        "answering simultaneous initiate"
                    );
                    let pending = PendingKeyExchange { sequence, ..ours };
                    (pending, KeyExchangeFlags::RESPONSE | KeyExchangeFlags::SIMULTANEOUS_INITIATE)
                },
            };

            actions.push(SessionAction::SendHandshake {
                address: address.clone(),
                thread_id,
                message: HandshakeMessage::Response(exchange_message(&pending, flags)),
            });
            pending
        } else {
            let Some(pending) = record.take_pending().filter(|p| p.sequence == sequence) else {
                warn!(
                    %address,
                    sequence,
                    simultaneous = message.is_simultaneous_response(),
                    "dropping stale key exchange response"
                );
                return Ok(HandshakeOutcome::dropped(HandshakeStatus::Stale));
            };

            self.require_trust(guard, address, &message.identity_key)?;
            pending
        };

        let ratchet = self.ratchet.initialize(&RatchetParameters {
            our_base: &pending.base,
            their_base: &message.base_key,
            our_ephemeral: &pending.ephemeral,
            their_ephemeral: &message.ephemeral_key,
            our_identity: &pending.identity,
            their_identity: &message.identity_key,
        })?;
        let state =
            SessionState::new(*pending.identity.public_key(), message.identity_key, ratchet);

        let purged = record.purge_legacy_states();
        if purged > 0 {
            debug!(%address, purged, "purged legacy session states");
        }

        actions.extend(self.commit_session(guard, address, record, state)?);
        actions.push(SessionAction::DrainPendingDecrypts { address: address.clone() });
        actions.push(SessionAction::SecurityUpdate { thread_id });

        info!(%address, sequence, "session established from key exchange");
        Ok(HandshakeOutcome { status: HandshakeStatus::Established, actions })
    }

    fn require_trust<S: Storage>(
        &self,
        guard: &SessionGuard<'_, S>,
        address: &PeerAddress,
        key: &PublicKey,
    ) -> Result<(), SessionError> {
        if self.identity.validate(guard, address, key)? {
            Ok(())
        } else {
            Err(SessionError::TrustRejected { address: address.clone() })
        }
    }

    /// Install `state` as the current session at `address` and record the
    /// peer's identity, in one batch.
    ///
    /// An identity change archives the peer's sessions before `state` is
    /// promoted, so the new session is the only live one left.
    fn commit_session<S: Storage>(
        &self,
        guard: &mut SessionGuard<'_, S>,
        address: &PeerAddress,
        record: SessionRecord,
        state: SessionState,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let remote_identity = state.remote_identity;

        let mut batch = WriteBatch::new();
        batch.put_session(address.clone(), record);
        let update =
            self.identity.stage_save(guard, &self.env, address, &remote_identity, &mut batch)?;

        let mut record = batch.take_session(address).unwrap_or_default();
        record.promote_state(state);
        batch.put_session(address.clone(), record);
        guard.commit(batch)?;

        Ok(update.actions)
    }
}

fn exchange_message(pending: &PendingKeyExchange, flags: KeyExchangeFlags) -> KeyExchangeMessage {
    KeyExchangeMessage {
        sequence: pending.sequence,
        flags,
        base_key: *pending.base.public_key(),
        ephemeral_key: *pending.ephemeral.public_key(),
        identity_key: *pending.identity.public_key(),
    }
}
