//! Simulated device.

use std::convert::Infallible;

use bytes::Bytes;
use keystone_core::{
    AccountId, ActionSink, HandshakeOutcome, IdentityNotice, KeyExchangeProcessor,
    MemoryPreKeyStore, MemoryStorage, NoGroups, PeerAddress, SessionConfig, SessionError,
    SessionRecord, SessionStore,
};
use keystone_crypto::{KeyPair, PublicKey};
use keystone_proto::{HandshakeKind, HandshakeMessage, PreKeyBundle, RatchetMessage};

use crate::{ChaoticStorage, Envelope, SimEnv};

type Processor = KeyExchangeProcessor<SimEnv, MemoryPreKeyStore, NoGroups>;

/// One device of one account.
///
/// Owns everything a real client would: a session store over its own
/// storage, the prekeys it has published, and a processor holding the
/// account's identity key.
pub struct SimDevice {
    address: PeerAddress,
    env: SimEnv,
    config: SessionConfig,
    store: SessionStore<ChaoticStorage<MemoryStorage>>,
    prekeys: MemoryPreKeyStore,
    processor: Processor,
    next_prekey_id: u32,
}

impl SimDevice {
    /// Create the device at `address` holding `identity`.
    pub fn new(
        address: PeerAddress,
        env: SimEnv,
        config: SessionConfig,
        identity: KeyPair,
    ) -> Self {
        let storage = ChaoticStorage::reliable(MemoryStorage::new());
        let store = SessionStore::new(AccountId::new(address.to_string()), storage);
        let prekeys = MemoryPreKeyStore::new();
        let processor = KeyExchangeProcessor::new(
            env.clone(),
            config.clone(),
            prekeys.clone(),
            NoGroups,
            identity,
        );

        Self { address, env, config, store, prekeys, processor, next_prekey_id: 1 }
    }

    /// Device address.
    pub const fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Device environment.
    pub const fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Session store.
    pub const fn store(&self) -> &SessionStore<ChaoticStorage<MemoryStorage>> {
        &self.store
    }

    /// Backing storage, for fault injection.
    pub const fn storage(&self) -> &ChaoticStorage<MemoryStorage> {
        self.store.storage()
    }

    /// Published prekeys still held.
    pub const fn prekeys(&self) -> &MemoryPreKeyStore {
        &self.prekeys
    }

    /// Handshake processor.
    pub const fn processor(&self) -> &Processor {
        &self.processor
    }

    /// The account identity key this device presents.
    pub const fn identity_key(&self) -> &PublicKey {
        self.processor.local_identity_key()
    }

    /// Publish a fresh one-time prekey and return the bundle a directory
    /// would hand out for it.
    pub fn publish_bundle(&mut self) -> Result<PreKeyBundle, SessionError> {
        let prekey_id = self.next_prekey_id;
        self.next_prekey_id += 1;
        self.publish(prekey_id)
    }

    /// Publish the last-resort prekey.
    pub fn publish_last_resort(&self) -> Result<PreKeyBundle, SessionError> {
        self.publish(self.config.last_resort_prekey_id)
    }

    fn publish(&self, prekey_id: u32) -> Result<PreKeyBundle, SessionError> {
        let prekey = self.prekeys.generate(&self.env, prekey_id)?;
        Ok(PreKeyBundle {
            device_id: self.address.device_id,
            prekey_id,
            prekey: *prekey.public_key(),
            identity_key: *self.identity_key(),
        })
    }

    /// Replace the account identity. Sessions and prekeys are kept.
    pub fn rotate_identity(&mut self, identity: KeyPair) {
        self.processor = KeyExchangeProcessor::new(
            self.env.clone(),
            self.config.clone(),
            self.prekeys.clone(),
            NoGroups,
            identity,
        );
    }

    /// Build a session toward `peer` from its bundle.
    pub fn establish_from_bundle(
        &self,
        peer: &PeerAddress,
        thread_id: u64,
        bundle: &PreKeyBundle,
    ) -> Result<HandshakeOutcome, SessionError> {
        let mut guard = self.store.lock();
        self.processor.process_prekey_bundle(&mut guard, peer, thread_id, bundle)
    }

    /// First message toward `peer` on a bundle-built session, wrapped so the
    /// peer can build its side. `None` once the prekey was acknowledged or
    /// when no session exists.
    pub fn prekey_message(
        &self,
        peer: &PeerAddress,
    ) -> Result<Option<HandshakeMessage>, SessionError> {
        let record = self.store.lock().load(peer)?;
        let Some(state) = record.current() else {
            return Ok(None);
        };

        let message = RatchetMessage {
            sender_ephemeral: state.ratchet.local_ratchet_key,
            counter: state.ratchet.sender_chain.as_ref().map_or(0, |chain| chain.index()),
            previous_counter: 0,
            ciphertext: b"hello".to_vec(),
        };
        Ok(state.wrap_prekey_message(message).map(HandshakeMessage::Bundle))
    }

    /// Record that `peer` answered on the live session.
    ///
    /// Returns whether a prekey was still unacknowledged.
    pub fn acknowledge_prekey(&self, peer: &PeerAddress) -> Result<bool, SessionError> {
        let mut guard = self.store.lock();
        let mut record = guard.load(peer)?;
        if !record.acknowledge_prekey() {
            return Ok(false);
        }
        guard.store(peer, record)?;
        Ok(true)
    }

    /// Open an interactive exchange with `peer`.
    pub fn initiate(
        &self,
        peer: &PeerAddress,
        thread_id: u64,
    ) -> Result<HandshakeOutcome, SessionError> {
        let mut guard = self.store.lock();
        self.processor.initiate(&mut guard, peer, thread_id)
    }

    /// Decode and process one inbound envelope.
    pub fn receive(&self, envelope: &Envelope) -> Result<HandshakeOutcome, SessionError> {
        let message = HandshakeMessage::decode(envelope.kind, &envelope.payload)?;
        let mut guard = self.store.lock();
        self.processor.process(&mut guard, &envelope.from, envelope.thread_id, &message)
    }

    /// Stored record for `peer`.
    pub fn session_with(&self, peer: &PeerAddress) -> Result<SessionRecord, SessionError> {
        self.store.lock().load(peer)
    }
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDevice")
            .field("address", &self.address)
            .field("next_prekey_id", &self.next_prekey_id)
            .finish_non_exhaustive()
    }
}

/// [`ActionSink`] that records everything and turns handshake sends into
/// envelopes for the network.
#[derive(Debug)]
pub struct RecordingSink {
    from: PeerAddress,
    /// Handshake messages waiting to be put on the network.
    pub outbox: Vec<Envelope>,
    /// Conversations whose security state was refreshed.
    pub security_updates: Vec<u64>,
    /// System messages inserted, in order.
    pub system_messages: Vec<String>,
    /// Devices whose queued messages were scheduled for decryption.
    pub drained: Vec<PeerAddress>,
}

impl RecordingSink {
    /// Sink for actions produced on device `from`.
    pub const fn new(from: PeerAddress) -> Self {
        Self {
            from,
            outbox: Vec::new(),
            security_updates: Vec::new(),
            system_messages: Vec::new(),
            drained: Vec::new(),
        }
    }
}

impl ActionSink for RecordingSink {
    type Error = Infallible;

    fn send_handshake(
        &mut self,
        address: &PeerAddress,
        thread_id: u64,
        kind: HandshakeKind,
        payload: Bytes,
    ) -> Result<(), Self::Error> {
        self.outbox.push(Envelope {
            from: self.from.clone(),
            to: address.clone(),
            thread_id,
            kind,
            payload,
        });
        Ok(())
    }

    fn security_updated(&mut self, thread_id: u64) -> Result<(), Self::Error> {
        self.security_updates.push(thread_id);
        Ok(())
    }

    fn insert_system_message(
        &mut self,
        _notice: &IdentityNotice,
        text: String,
    ) -> Result<(), Self::Error> {
        self.system_messages.push(text);
        Ok(())
    }

    fn schedule_pending_decrypts(&mut self, address: &PeerAddress) -> Result<(), Self::Error> {
        self.drained.push(address.clone());
        Ok(())
    }
}
