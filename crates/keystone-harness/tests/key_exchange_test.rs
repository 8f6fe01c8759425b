//! Interactive key exchanges, including initiates that cross in flight.

#![allow(clippy::unwrap_used)]

use keystone_core::{HandshakeState, HandshakeStatus, PeerAddress, SessionConfig};
use keystone_harness::SimWorld;
use proptest::prelude::*;

fn two_accounts(seed: u64) -> (SimWorld, PeerAddress, PeerAddress) {
    let mut world = SimWorld::new(seed, SessionConfig::default());
    let alice = world.add_account("alice", 1).remove(0);
    let bob = world.add_account("bob", 1).remove(0);
    (world, alice, bob)
}

#[test]
fn initiate_and_response_establish_both_sides() {
    let (mut world, alice, bob) = two_accounts(1);

    assert_eq!(world.initiate(&alice, &bob).unwrap(), HandshakeStatus::Initiated);
    let state = world.device(&alice).unwrap().store().lock().handshake_state(&bob).unwrap();
    assert_eq!(state, HandshakeState::PendingInitiate);

    assert_eq!(world.deliver(&alice, &bob).unwrap(), Some(HandshakeStatus::Established));
    assert_eq!(world.deliver(&bob, &alice).unwrap(), Some(HandshakeStatus::Established));

    assert!(world.converged(&alice, &bob).unwrap());
    assert_eq!(world.sink(&alice).unwrap().drained, vec![bob.clone()]);
    assert_eq!(world.sink(&bob).unwrap().drained, vec![alice.clone()]);
    let state = world.device(&alice).unwrap().store().lock().handshake_state(&bob).unwrap();
    assert_eq!(state, HandshakeState::Established);
}

#[test]
fn response_to_a_superseded_initiate_is_stale() {
    let (mut world, alice, bob) = two_accounts(2);

    world.initiate(&alice, &bob).unwrap();
    world.initiate(&alice, &bob).unwrap();
    world.deliver(&alice, &bob).unwrap();
    world.deliver(&alice, &bob).unwrap();

    assert_eq!(world.deliver(&bob, &alice).unwrap(), Some(HandshakeStatus::Stale));
    assert!(!world.converged(&alice, &bob).unwrap());
    assert_eq!(world.deliver(&bob, &alice).unwrap(), Some(HandshakeStatus::Established));
    assert!(world.converged(&alice, &bob).unwrap());
}

#[test]
fn crossed_initiates_converge() {
    let (mut world, alice, bob) = two_accounts(3);

    world.initiate(&alice, &bob).unwrap();
    world.initiate(&bob, &alice).unwrap();
    world.deliver_all(16).unwrap();

    assert!(world.converged(&alice, &bob).unwrap());
    assert_eq!(world.network().in_flight(), 0);
    world.check_invariants().unwrap();
}

#[test]
fn new_exchange_archives_the_old_session() {
    let (mut world, alice, bob) = two_accounts(4);

    world.initiate(&alice, &bob).unwrap();
    world.deliver_all(16).unwrap();
    world.initiate(&bob, &alice).unwrap();
    world.deliver_all(16).unwrap();

    assert!(world.converged(&alice, &bob).unwrap());
    assert_eq!(world.session(&alice, &bob).unwrap().archived_len(), 1);
    assert_eq!(world.session(&bob, &alice).unwrap().archived_len(), 1);
}

proptest! {
    /// Whatever order the two links deliver in, one initiate from each side
    /// ends with matching sessions.
    #[test]
    fn prop_crossed_initiates_converge_in_any_order(
        seed in any::<u64>(),
        bob_initiates_after in 0..4usize,
        schedule in prop::collection::vec(any::<bool>(), 0..8),
    ) {
        let (mut world, alice, bob) = two_accounts(seed);
        world.initiate(&alice, &bob).unwrap();

        let mut bob_initiated = false;
        for (step, alice_to_bob) in schedule.into_iter().enumerate() {
            if step == bob_initiates_after {
                world.initiate(&bob, &alice).unwrap();
                bob_initiated = true;
            }
            if alice_to_bob {
                world.deliver(&alice, &bob).unwrap();
            } else {
                world.deliver(&bob, &alice).unwrap();
            }
        }
        if !bob_initiated {
            world.initiate(&bob, &alice).unwrap();
        }
        world.deliver_all(16).unwrap();

        prop_assert!(world.converged(&alice, &bob).unwrap());
        prop_assert_eq!(world.network().in_flight(), 0);
    }
}
