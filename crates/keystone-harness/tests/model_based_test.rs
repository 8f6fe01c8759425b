//! Model-based property tests.
//!
//! Random operation sequences run against a world of three accounts; after
//! every step the stored state of every device must stay consistent.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!                          ▼
//!                 SimWorld (3 accounts, 5 devices)
//!                          │
//!                          ▼
//!                 check_invariants()
//! ```

use keystone_core::{SessionConfig, TrustPolicy};
use keystone_harness::{Operation, SimWorld};
use proptest::prelude::*;

fn world(seed: u64, policy: TrustPolicy) -> SimWorld {
    let config = SessionConfig { trust_policy: policy, ..SessionConfig::default() };
    let mut world = SimWorld::new(seed, config);
    world.add_account("alice", 1);
    world.add_account("bob", 2);
    world.add_account("carol", 2);
    world
}

/// Strategy for generating operations.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    let device = any::<u8>();

    prop_oneof![
        // Weight towards handshakes and delivery
        3 => (device.clone(), device.clone())
            .prop_map(|(from, to)| Operation::Initiate { from, to }),
        3 => (device.clone(), device.clone())
            .prop_map(|(from, to)| Operation::SendPrekeyMessage { from, to }),
        4 => (device.clone(), device.clone())
            .prop_map(|(from, to)| Operation::Deliver { from, to }),
        2 => Just(Operation::DeliverAll),
        1 => device.clone().prop_map(|device| Operation::RotateIdentity { device }),
        1 => device.prop_map(|device| Operation::FailNextCommit { device }),
        1 => any::<u16>().prop_map(|millis| Operation::AdvanceTime { millis }),
    ]
}

fn policy_strategy() -> impl Strategy<Value = TrustPolicy> {
    prop_oneof![Just(TrustPolicy::RejectChanged), Just(TrustPolicy::AcceptChanged)]
}

proptest! {
    /// Storage invariants hold after any operation sequence.
    #[test]
    fn prop_invariants_hold(
        seed in any::<u64>(),
        policy in policy_strategy(),
        ops in prop::collection::vec(operation_strategy(), 0..60),
    ) {
        let mut world = world(seed, policy);

        for (i, op) in ops.iter().enumerate() {
            let applied = op.apply(&mut world);
            prop_assert!(applied.is_ok(), "operation {} ({:?}) failed: {:?}", i, op, applied);

            let checked = world.check_invariants();
            prop_assert!(checked.is_ok(), "after operation {} ({:?}): {:?}", i, op, checked);
        }
    }
}

#[test]
fn scripted_operations_keep_invariants() {
    let mut world = world(5, TrustPolicy::AcceptChanged);
    let ops = [
        Operation::SendPrekeyMessage { from: 0, to: 1 },
        Operation::SendPrekeyMessage { from: 0, to: 2 },
        Operation::Initiate { from: 3, to: 0 },
        Operation::DeliverAll,
        Operation::RotateIdentity { device: 1 },
        Operation::FailNextCommit { device: 0 },
        Operation::SendPrekeyMessage { from: 0, to: 1 },
        Operation::SendPrekeyMessage { from: 0, to: 1 },
        Operation::AdvanceTime { millis: 500 },
        Operation::DeliverAll,
    ];

    for op in &ops {
        assert!(op.apply(&mut world).is_ok(), "{op:?}");
        assert!(world.check_invariants().is_ok());
    }
}
