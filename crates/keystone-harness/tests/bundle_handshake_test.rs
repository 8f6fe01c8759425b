//! Bundle handshakes between simulated devices.

#![allow(clippy::unwrap_used)]

use keystone_core::{HandshakeStatus, PeerAddress, PreKeyStore, SessionConfig, SessionError};
use keystone_harness::{SimWorld, WorldError};

fn two_accounts(bob_devices: u32) -> (SimWorld, PeerAddress, Vec<PeerAddress>) {
    let mut world = SimWorld::new(7, SessionConfig::default());
    let alice = world.add_account("alice", 1).remove(0);
    let bob = world.add_account("bob", bob_devices);
    (world, alice, bob)
}

#[test]
fn prekey_message_builds_matching_session() {
    let (mut world, alice, bob) = two_accounts(1);
    let bob = &bob[0];

    assert_eq!(world.establish_from_bundle(&alice, bob).unwrap(), HandshakeStatus::Established);
    assert!(world.send_prekey_message(&alice, bob).unwrap());
    assert_eq!(world.deliver(&alice, bob).unwrap(), Some(HandshakeStatus::Established));

    assert!(world.converged(&alice, bob).unwrap());
    assert!(world.device(bob).unwrap().prekeys().is_empty().unwrap());
    assert_eq!(world.sink(&alice).unwrap().security_updates, vec![1]);
    assert_eq!(world.sink(bob).unwrap().security_updates, vec![1]);

    let device = world.device(bob).unwrap();
    let guard = device.store().lock();
    let on_file = device.processor().identity().record(&guard, "alice").unwrap().unwrap();
    assert_eq!(on_file.identity_key, *world.device(&alice).unwrap().identity_key());
    assert!(on_file.first_use);
    drop(guard);
    world.check_invariants().unwrap();
}

#[test]
fn redelivered_prekey_message_is_a_duplicate() {
    let (mut world, alice, bob) = two_accounts(1);
    let bob = &bob[0];

    world.establish_from_bundle(&alice, bob).unwrap();
    world.send_prekey_message(&alice, bob).unwrap();
    world.send_prekey_message(&alice, bob).unwrap();
    world.deliver(&alice, bob).unwrap();
    let before = world.session(bob, &alice).unwrap();

    assert_eq!(world.deliver(&alice, bob).unwrap(), Some(HandshakeStatus::Duplicate));
    assert_eq!(world.session(bob, &alice).unwrap(), before);
    assert!(world.converged(&alice, bob).unwrap());
}

#[test]
fn acknowledged_session_stops_sending_prekey_messages() {
    let (mut world, alice, bob) = two_accounts(1);
    let bob = &bob[0];

    world.establish_from_bundle(&alice, bob).unwrap();
    world.send_prekey_message(&alice, bob).unwrap();
    world.deliver(&alice, bob).unwrap();
    let established = world.session(&alice, bob).unwrap().current().cloned().unwrap();

    assert!(world.acknowledge_prekey(&alice, bob).unwrap());
    assert!(!world.acknowledge_prekey(&alice, bob).unwrap());
    assert!(!world.send_prekey_message(&alice, bob).unwrap());
    assert_eq!(world.network().in_flight(), 0);

    let acknowledged = world.session(&alice, bob).unwrap().current().cloned().unwrap();
    assert!(acknowledged.unacknowledged_prekey.is_none());
    assert_eq!(acknowledged.ratchet, established.ratchet);
    assert!(world.converged(&alice, bob).unwrap());
}

#[test]
fn prekey_message_for_a_lost_prekey_is_refused() {
    let (mut world, alice, bob) = two_accounts(1);
    let bob = &bob[0];

    world.establish_from_bundle(&alice, bob).unwrap();
    world.send_prekey_message(&alice, bob).unwrap();
    world.device(bob).unwrap().prekeys().remove(1).unwrap();

    let error = world.deliver(&alice, bob).unwrap_err();
    assert!(matches!(
        error,
        WorldError::Session { source: SessionError::InvalidKeyId { prekey_id: 1 }, .. }
    ));
    assert!(world.session(bob, &alice).unwrap().is_fresh());
}

#[test]
fn last_resort_prekey_survives_use() {
    let (mut world, alice, bob) = two_accounts(1);
    let bob = &bob[0];

    let bundle = world.device(bob).unwrap().publish_last_resort().unwrap();
    world.device(&alice).unwrap().establish_from_bundle(bob, 1, &bundle).unwrap();
    world.send_prekey_message(&alice, bob).unwrap();

    assert_eq!(world.deliver(&alice, bob).unwrap(), Some(HandshakeStatus::Established));
    assert!(world.device(bob).unwrap().prekeys().contains(bundle.prekey_id).unwrap());
}

#[test]
fn every_device_of_a_peer_gets_its_own_session() {
    let (mut world, alice, bob) = two_accounts(3);

    for device in &bob {
        world.establish_from_bundle(&alice, device).unwrap();
        world.send_prekey_message(&alice, device).unwrap();
    }
    assert_eq!(world.deliver_all(16).unwrap(), 3);

    for device in &bob {
        assert!(world.converged(&alice, device).unwrap());
    }
    let store = world.device(&alice).unwrap().store();
    let guard = store.lock();
    assert_eq!(guard.sub_device_sessions("bob").unwrap(), vec![2, 3]);
    assert_eq!(guard.active_addresses(["bob"]).unwrap().len(), 3);
    drop(guard);
    world.check_invariants().unwrap();
}
