//! A set of simulated accounts and the network between them.

use std::collections::BTreeMap;

use keystone_core::{
    Environment, HandshakeOutcome, HandshakeStatus, PeerAddress, SessionConfig, SessionError,
    SessionRecord, Storage, dispatch, session::ARCHIVED_STATES_MAX_LENGTH,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{RecordingSink, SimDevice, SimEnv, SimNetwork};

/// Failures surfaced by [`SimWorld`].
#[derive(Debug, Error)]
pub enum WorldError {
    /// No device is registered at the address.
    #[error("unknown device {0}")]
    UnknownDevice(PeerAddress),

    /// A session operation on `device` failed.
    #[error("{device}: {source}")]
    Session {
        /// Device the operation ran on.
        device: PeerAddress,
        /// Underlying failure.
        #[source]
        source: SessionError,
    },

    /// Stored state broke a consistency rule.
    #[error("invariant violated on {device}: {reason}")]
    Invariant {
        /// Device whose store is inconsistent.
        device: PeerAddress,
        /// What was found.
        reason: String,
    },
}

impl WorldError {
    /// Underlying session error, if any.
    pub const fn session_error(&self) -> Option<&SessionError> {
        match self {
            Self::Session { source, .. } => Some(source),
            Self::UnknownDevice(_) | Self::Invariant { .. } => None,
        }
    }
}

/// Accounts, their devices and the links between them.
///
/// Every action a device produces is dispatched into that device's
/// [`RecordingSink`]; handshake sends are moved onto the [`SimNetwork`]
/// right away and delivered only when asked.
#[derive(Debug)]
pub struct SimWorld {
    env: SimEnv,
    config: SessionConfig,
    devices: BTreeMap<PeerAddress, SimDevice>,
    sinks: BTreeMap<PeerAddress, RecordingSink>,
    network: SimNetwork,
    threads: BTreeMap<(String, String), u64>,
    next_thread: u64,
}

impl SimWorld {
    /// An empty world seeded with `seed`.
    pub fn new(seed: u64, config: SessionConfig) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            config,
            devices: BTreeMap::new(),
            sinks: BTreeMap::new(),
            network: SimNetwork::new(),
            threads: BTreeMap::new(),
            next_thread: 1,
        }
    }

    /// Shared clock and seed source.
    pub const fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Register account `name` with `devices` devices sharing one identity.
    pub fn add_account(&mut self, name: &str, devices: u32) -> Vec<PeerAddress> {
        let identity = self.env.generate_key_pair();

        (1..=devices.max(1))
            .map(|device_id| {
                let address = PeerAddress::new(name, device_id);
                let device = SimDevice::new(
                    address.clone(),
                    self.env.fork(),
                    self.config.clone(),
                    identity.clone(),
                );
                self.devices.insert(address.clone(), device);
                self.sinks.insert(address.clone(), RecordingSink::new(address.clone()));
                address
            })
            .collect()
    }

    /// Every registered device, sorted.
    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.devices.keys().cloned().collect()
    }

    /// The device at `address`.
    pub fn device(&self, address: &PeerAddress) -> Result<&SimDevice, WorldError> {
        self.devices.get(address).ok_or_else(|| WorldError::UnknownDevice(address.clone()))
    }

    /// Everything dispatched on `address` so far.
    pub fn sink(&self, address: &PeerAddress) -> Option<&RecordingSink> {
        self.sinks.get(address)
    }

    /// The network.
    pub const fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Conversation id shared by two accounts, assigned on first use.
    pub fn thread_id(&mut self, a: &str, b: &str) -> u64 {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let next = &mut self.next_thread;
        *self.threads.entry((low.to_string(), high.to_string())).or_insert_with(|| {
            let id = *next;
            *next += 1;
            id
        })
    }

    /// `from` fetches a fresh bundle published by `to` and builds a session.
    pub fn establish_from_bundle(
        &mut self,
        from: &PeerAddress,
        to: &PeerAddress,
    ) -> Result<HandshakeStatus, WorldError> {
        let thread_id = self.thread_id(&from.name, &to.name);
        let bundle = self
            .devices
            .get_mut(to)
            .ok_or_else(|| WorldError::UnknownDevice(to.clone()))?
            .publish_bundle()
            .map_err(|source| WorldError::Session { device: to.clone(), source })?;

        let outcome = self
            .device(from)?
            .establish_from_bundle(to, thread_id, &bundle)
            .map_err(|source| WorldError::Session { device: from.clone(), source })?;
        Ok(self.dispatch(from, outcome))
    }

    /// Put `from`'s first message to `to` on the network.
    ///
    /// Returns whether a message was sent; nothing is sent when `from` has no
    /// bundle-built session with `to` whose prekey is still unacknowledged.
    pub fn send_prekey_message(
        &mut self,
        from: &PeerAddress,
        to: &PeerAddress,
    ) -> Result<bool, WorldError> {
        let thread_id = self.thread_id(&from.name, &to.name);
        let device = self.device(from)?;
        let session_error =
            |source: SessionError| WorldError::Session { device: from.clone(), source };

        let Some(message) = device.prekey_message(to).map_err(session_error)? else {
            return Ok(false);
        };
        let payload = message.encode().map_err(|e| session_error(e.into()))?;

        self.network.send(crate::Envelope {
            from: from.clone(),
            to: to.clone(),
            thread_id,
            kind: message.kind(),
            payload,
        });
        Ok(true)
    }

    /// `from` records that `to` answered on their session.
    pub fn acknowledge_prekey(
        &self,
        from: &PeerAddress,
        to: &PeerAddress,
    ) -> Result<bool, WorldError> {
        self.device(from)?
            .acknowledge_prekey(to)
            .map_err(|source| WorldError::Session { device: from.clone(), source })
    }

    /// `from` opens an interactive exchange with `to`.
    pub fn initiate(
        &mut self,
        from: &PeerAddress,
        to: &PeerAddress,
    ) -> Result<HandshakeStatus, WorldError> {
        let thread_id = self.thread_id(&from.name, &to.name);
        let outcome = self
            .device(from)?
            .initiate(to, thread_id)
            .map_err(|source| WorldError::Session { device: from.clone(), source })?;
        Ok(self.dispatch(from, outcome))
    }

    /// Deliver the oldest message on `from → to`.
    ///
    /// Returns `None` when the link is empty.
    pub fn deliver(
        &mut self,
        from: &PeerAddress,
        to: &PeerAddress,
    ) -> Result<Option<HandshakeStatus>, WorldError> {
        let Some(envelope) = self.network.deliver(from, to) else {
            return Ok(None);
        };

        trace!(%from, %to, kind = ?envelope.kind, "delivering");
        let outcome = self
            .device(to)?
            .receive(&envelope)
            .map_err(|source| WorldError::Session { device: to.clone(), source })?;
        Ok(Some(self.dispatch(to, outcome)))
    }

    /// Deliver until the network is idle, one message per busy link per
    /// round, at most `max_messages` in total.
    ///
    /// Stops at the first failing delivery.
    pub fn deliver_all(&mut self, max_messages: usize) -> Result<usize, WorldError> {
        let mut delivered = 0;

        while delivered < max_messages {
            let links = self.network.busy_links();
            if links.is_empty() {
                break;
            }
            for (from, to) in links {
                if delivered == max_messages {
                    break;
                }
                self.deliver(&from, &to)?;
                delivered += 1;
            }
        }

        Ok(delivered)
    }

    /// Give every device of account `name` a new identity key.
    pub fn rotate_identity(&mut self, name: &str) {
        let identity = self.env.generate_key_pair();
        for device in self.devices.values_mut().filter(|device| device.address().name == name) {
            device.rotate_identity(identity.clone());
        }
        debug!(account = name, "rotated identity");
    }

    /// Fail the next storage commit on `address`.
    pub fn fail_next_commit(&self, address: &PeerAddress) -> Result<(), WorldError> {
        self.device(address)?.storage().fail_next_commit();
        Ok(())
    }

    /// Record `from` holds for `to`.
    pub fn session(
        &self,
        from: &PeerAddress,
        to: &PeerAddress,
    ) -> Result<SessionRecord, WorldError> {
        self.device(from)?
            .session_with(to)
            .map_err(|source| WorldError::Session { device: from.clone(), source })
    }

    /// Whether `a` and `b` hold matching live sessions with each other.
    ///
    /// Matching means one root key, each side's ratchet key known to the
    /// other, and each sending chain equal to the other's receiving chain.
    pub fn converged(&self, a: &PeerAddress, b: &PeerAddress) -> Result<bool, WorldError> {
        let ours = self.session(a, b)?;
        let theirs = self.session(b, a)?;

        let (Some(ours), Some(theirs)) = (ours.current(), theirs.current()) else {
            return Ok(false);
        };
        let (ours, theirs) = (&ours.ratchet, &theirs.ratchet);

        Ok(ours.root_key == theirs.root_key
            && ours.local_ratchet_key == theirs.remote_ratchet_key
            && ours.remote_ratchet_key == theirs.local_ratchet_key
            && ours.sender_chain == theirs.receiver_chain
            && ours.receiver_chain == theirs.sender_chain)
    }

    /// Check every device's stored state.
    ///
    /// - No record holds more than [`ARCHIVED_STATES_MAX_LENGTH`] archived
    ///   states.
    /// - Every active session was built with the identity key on file for
    ///   its peer.
    pub fn check_invariants(&self) -> Result<(), WorldError> {
        for (address, device) in &self.devices {
            let violation =
                |reason: String| WorldError::Invariant { device: address.clone(), reason };
            let session_error = |source: SessionError| WorldError::Session {
                device: address.clone(),
                source,
            };

            let store = device.store();
            let peers = store
                .storage()
                .all_sessions(store.account())
                .map_err(|e| session_error(e.into()))?;
            let guard = store.lock();

            for peer in peers {
                let record = guard.load(&peer).map_err(session_error)?;
                if record.archived_len() > ARCHIVED_STATES_MAX_LENGTH {
                    return Err(violation(format!(
                        "{peer} holds {} archived states",
                        record.archived_len()
                    )));
                }

                let Some(state) = record.current().filter(|_| record.is_active()) else {
                    continue;
                };
                let on_file = device
                    .processor()
                    .identity()
                    .record(&guard, &peer.name)
                    .map_err(session_error)?;
                match on_file {
                    Some(identity) if identity.identity_key == state.remote_identity => {},
                    Some(_) => {
                        return Err(violation(format!("{peer} session uses a replaced identity")));
                    },
                    None => {
                        return Err(violation(format!("{peer} session has no identity on file")));
                    },
                }
            }
        }

        Ok(())
    }

    fn dispatch(&mut self, address: &PeerAddress, outcome: HandshakeOutcome) -> HandshakeStatus {
        let Some(sink) = self.sinks.get_mut(address) else {
            return outcome.status;
        };

        dispatch(sink, outcome.actions);
        for envelope in sink.outbox.drain(..) {
            self.network.send(envelope);
        }
        outcome.status
    }
}
