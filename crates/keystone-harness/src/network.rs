//! In-memory message network.
//!
//! Each directed link between two devices is a FIFO queue. Links are
//! independent: the harness chooses which link delivers next, which is how
//! interleavings are explored, but it can never reorder messages within a
//! link.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use keystone_core::PeerAddress;
use keystone_proto::HandshakeKind;

/// One handshake message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending device.
    pub from: PeerAddress,
    /// Receiving device.
    pub to: PeerAddress,
    /// Conversation the message belongs to.
    pub thread_id: u64,
    /// Payload family.
    pub kind: HandshakeKind,
    /// Encoded message.
    pub payload: Bytes,
}

/// Per-link FIFO queues.
#[derive(Debug, Default)]
pub struct SimNetwork {
    links: BTreeMap<(PeerAddress, PeerAddress), VecDeque<Envelope>>,
}

impl SimNetwork {
    /// An empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `envelope` at the back of its link.
    pub fn send(&mut self, envelope: Envelope) {
        let link = (envelope.from.clone(), envelope.to.clone());
        self.links.entry(link).or_default().push_back(envelope);
    }

    /// Take the oldest message on the link `from → to`.
    pub fn deliver(&mut self, from: &PeerAddress, to: &PeerAddress) -> Option<Envelope> {
        let link = (from.clone(), to.clone());
        let queue = self.links.get_mut(&link)?;
        let envelope = queue.pop_front();
        if queue.is_empty() {
            self.links.remove(&link);
        }
        envelope
    }

    /// Links with at least one message queued, in a stable order.
    pub fn busy_links(&self) -> Vec<(PeerAddress, PeerAddress)> {
        self.links.keys().cloned().collect()
    }

    /// Number of messages queued on `from → to`.
    pub fn queued(&self, from: &PeerAddress, to: &PeerAddress) -> usize {
        self.links.get(&(from.clone(), to.clone())).map_or(0, VecDeque::len)
    }

    /// Number of messages queued on every link.
    pub fn in_flight(&self) -> usize {
        self.links.values().map(VecDeque::len).sum()
    }

    /// Drop every queued message.
    pub fn clear(&mut self) {
        self.links.clear();
    }
}
