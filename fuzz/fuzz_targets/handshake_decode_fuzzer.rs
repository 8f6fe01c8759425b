//! Fuzz target for handshake and session record decoding
//!
//! # Strategy
//!
//! - Raw bytes labelled with either handshake family
//! - The same bytes as a stored session record
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded message re-encodes, and the re-encoding decodes to the same
//!   message
//! - Legacy versions decode without parsing the body and never re-encode

#![no_main]

use arbitrary::Arbitrary;
use keystone_core::SessionRecord;
use keystone_proto::{HandshakeKind, HandshakeMessage};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    key_exchange: bool,
    bytes: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let kind =
        if input.key_exchange { HandshakeKind::KeyExchange } else { HandshakeKind::PreKey };

    if let Ok(message) = HandshakeMessage::decode(kind, &input.bytes) {
        assert_eq!(message.kind(), kind);

        match &message {
            HandshakeMessage::Legacy { .. } => assert!(message.encode().is_err()),
            _ => {
                let encoded = message.encode().expect("decoded message must re-encode");
                let decoded =
                    HandshakeMessage::decode(kind, &encoded).expect("re-encoding must decode");
                assert_eq!(decoded, message);
            },
        }
    }

    let _ = SessionRecord::decode(&input.bytes);
});
