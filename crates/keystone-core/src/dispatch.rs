//! Executes session actions against the transport and presentation layers.
//!
//! Dispatch is best-effort: a failing action is logged and the rest still
//! run. Session state was committed before the actions were produced, so a
//! lost notification never leaves the store inconsistent.

use std::fmt;

use bytes::Bytes;
use keystone_proto::HandshakeKind;
use tracing::error;

use crate::{PeerAddress, SessionAction, identity::IdentityNotice};

/// Receiver of the side effects session operations request.
pub trait ActionSink {
    /// Failure reported by the sink.
    type Error: fmt::Display;

    /// Send an encoded handshake message to `address`.
    fn send_handshake(
        &mut self,
        address: &PeerAddress,
        thread_id: u64,
        kind: HandshakeKind,
        payload: Bytes,
    ) -> Result<(), Self::Error>;

    /// Refresh the security indicators of conversation `thread_id`.
    fn security_updated(&mut self, thread_id: u64) -> Result<(), Self::Error>;

    /// Insert `text` as a system message for `notice`.
    fn insert_system_message(
        &mut self,
        notice: &IdentityNotice,
        text: String,
    ) -> Result<(), Self::Error>;

    /// Retry queued messages from `address` that could not be decrypted yet.
    fn schedule_pending_decrypts(&mut self, address: &PeerAddress) -> Result<(), Self::Error>;
}

/// Counts from one [`dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Actions the sink accepted.
    pub executed: usize,
    /// Actions that failed to encode or were refused by the sink.
    pub failed: usize,
}

/// Execute `actions` in order against `sink`.
///
/// Call only after the session guard that produced the actions is dropped.
pub fn dispatch<K: ActionSink>(
    sink: &mut K,
    actions: impl IntoIterator<Item = SessionAction>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for action in actions {
        let result = match &action {
            SessionAction::SendHandshake { address, thread_id, message } => {
                match message.encode() {
                    Ok(payload) => sink
                        .send_handshake(address, *thread_id, message.kind(), payload)
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(format!("encode failed: {e}")),
                }
            },
            SessionAction::SecurityUpdate { thread_id } => {
                sink.security_updated(*thread_id).map_err(|e| e.to_string())
            },
            SessionAction::DrainPendingDecrypts { address } => {
                sink.schedule_pending_decrypts(address).map_err(|e| e.to_string())
            },
            SessionAction::IdentityNotice(notice) => {
                sink.insert_system_message(notice, notice.describe()).map_err(|e| e.to_string())
            },
        };

        match result {
            Ok(()) => report.executed += 1,
            Err(reason) => {
                error!(?action, %reason, "session action failed");
                report.failed += 1;
            },
        }
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use keystone_crypto::PublicKey;
    use keystone_proto::{HandshakeMessage, KeyExchangeFlags, KeyExchangeMessage};

    use super::*;
    use crate::identity::{IdentityChange, NoticeOrigin, NoticeScope};

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(PeerAddress, HandshakeKind, Bytes)>,
        updated: Vec<u64>,
        messages: Vec<String>,
        drained: Vec<PeerAddress>,
        refuse_updates: bool,
    }

    impl ActionSink for Recorder {
        type Error = &'static str;

        fn send_handshake(
            &mut self,
            address: &PeerAddress,
            _thread_id: u64,
            kind: HandshakeKind,
            payload: Bytes,
        ) -> Result<(), Self::Error> {
            self.sent.push((address.clone(), kind, payload));
            Ok(())
        }

        fn security_updated(&mut self, thread_id: u64) -> Result<(), Self::Error> {
            if self.refuse_updates {
                return Err("thread gone");
            }
            self.updated.push(thread_id);
            Ok(())
        }

        fn insert_system_message(
            &mut self,
            _notice: &IdentityNotice,
            text: String,
        ) -> Result<(), Self::Error> {
            self.messages.push(text);
            Ok(())
        }

        fn schedule_pending_decrypts(&mut self, address: &PeerAddress) -> Result<(), Self::Error> {
            self.drained.push(address.clone());
            Ok(())
        }
    }

    fn initiate() -> HandshakeMessage {
        HandshakeMessage::Initiate(KeyExchangeMessage {
            sequence: 5,
            flags: KeyExchangeFlags::INITIATE,
            base_key: PublicKey::from_bytes([1; 32]),
            ephemeral_key: PublicKey::from_bytes([2; 32]),
            identity_key: PublicKey::from_bytes([3; 32]),
        })
    }

    #[test]
    fn executes_every_action_in_order() {
        let bob = PeerAddress::primary("bob");
        let actions = vec![
            SessionAction::SendHandshake {
                address: bob.clone(),
                thread_id: 9,
                message: initiate(),
            },
            SessionAction::IdentityNotice(IdentityNotice {
                peer: "bob".to_string(),
                scope: NoticeScope::Direct,
                origin: NoticeOrigin::Remote,
                change: IdentityChange::KeyChanged,
            }),
            SessionAction::DrainPendingDecrypts { address: bob.clone() },
            SessionAction::SecurityUpdate { thread_id: 9 },
        ];

        let mut sink = Recorder::default();
        let report = dispatch(&mut sink, actions);

        assert_eq!(report, DispatchReport { executed: 4, failed: 0 });
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(sink.sent[0].1, HandshakeKind::KeyExchange);
        assert_eq!(
            HandshakeMessage::decode(HandshakeKind::KeyExchange, &sink.sent[0].2).unwrap(),
            initiate()
        );
        assert_eq!(sink.messages, vec!["Your safety number with bob has changed".to_string()]);
        assert_eq!(sink.drained, vec![bob]);
        assert_eq!(sink.updated, vec![9]);
    }

    #[test]
    fn failures_do_not_stop_dispatch() {
        let actions = vec![
            SessionAction::SecurityUpdate { thread_id: 1 },
            SessionAction::SendHandshake {
                address: PeerAddress::primary("bob"),
                thread_id: 1,
                message: HandshakeMessage::Legacy { kind: HandshakeKind::PreKey, version: 1 },
            },
            SessionAction::DrainPendingDecrypts { address: PeerAddress::primary("bob") },
        ];

        let mut sink = Recorder { refuse_updates: true, ..Recorder::default() };
        let report = dispatch(&mut sink, actions);

        assert_eq!(report, DispatchReport { executed: 1, failed: 2 });
        assert!(sink.sent.is_empty());
        assert_eq!(sink.drained.len(), 1);
    }
}
