//! Fuzz target for session establishment across simulated devices
//!
//! # Strategy
//!
//! - Arbitrary sequences of initiates, bundle handshakes, deliveries,
//!   identity rotations and injected storage failures
//! - Both trust policies
//!
//! # Invariants
//!
//! - Only refused identities, consumed prekeys and injected storage faults
//!   fail an operation
//! - No record exceeds the archive bound
//! - Every active session uses the identity key on file for its peer

#![no_main]

use arbitrary::Arbitrary;
use keystone_core::{SessionConfig, TrustPolicy};
use keystone_harness::{Operation, SimWorld};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    accept_changed: bool,
    operations: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let trust_policy = if input.accept_changed {
        TrustPolicy::AcceptChanged
    } else {
        TrustPolicy::RejectChanged
    };
    let mut world =
        SimWorld::new(input.seed, SessionConfig { trust_policy, ..SessionConfig::default() });
    world.add_account("alice", 1);
    world.add_account("bob", 2);
    world.add_account("carol", 1);

    for operation in input.operations.iter().take(256) {
        if let Err(error) = operation.apply(&mut world) {
            panic!("{operation:?} failed: {error}");
        }
        if let Err(error) = world.check_invariants() {
            panic!("after {operation:?}: {error}");
        }
    }
});
