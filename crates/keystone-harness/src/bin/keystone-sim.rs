//! Keystone session simulator.
//!
//! Runs a scripted scenario between two accounts over the in-memory network
//! and logs what each step produced.
//!
//! # Usage
//!
//! ```bash
//! keystone-sim --seed 7 --devices 3
//! RUST_LOG=keystone_core=debug keystone-sim --accept-changed
//! ```

use clap::Parser;
use keystone_core::{PeerAddress, SessionConfig, TrustPolicy};
use keystone_harness::SimWorld;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keystone session simulator
#[derive(Parser, Debug)]
#[command(name = "keystone-sim")]
#[command(about = "Simulate Keystone session establishment")]
#[command(version)]
struct Args {
    /// World seed
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Devices on the second account
    #[arg(short, long, default_value = "2")]
    devices: u32,

    /// Accept changed identity keys instead of refusing them
    #[arg(long)]
    accept_changed: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

const MAX_MESSAGES: usize = 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let trust_policy =
        if args.accept_changed { TrustPolicy::AcceptChanged } else { TrustPolicy::RejectChanged };
    let config = SessionConfig { trust_policy, ..SessionConfig::default() };
    let mut world = SimWorld::new(args.seed, config);

    let alice = PeerAddress::primary("alice");
    world.add_account(&alice.name, 1);
    let bob = world.add_account("bob", args.devices);
    info!(seed = args.seed, devices = bob.len(), ?trust_policy, "world ready");

    for device in &bob {
        let status = world.establish_from_bundle(&alice, device)?;
        world.send_prekey_message(&alice, device)?;
        info!(%device, ?status, "bundle session built");
    }
    let delivered = world.deliver_all(MAX_MESSAGES)?;
    info!(delivered, "prekey messages delivered");

    let primary = bob.first().cloned().unwrap_or_else(|| PeerAddress::primary("bob"));
    world.initiate(&alice, &primary)?;
    world.initiate(&primary, &alice)?;
    let delivered = world.deliver_all(MAX_MESSAGES)?;
    info!(
        delivered,
        converged = world.converged(&alice, &primary)?,
        "simultaneous initiate settled"
    );

    world.rotate_identity("bob");
    info!("bob rotated identity");
    match world.establish_from_bundle(&alice, &primary) {
        Ok(status) => {
            let live = bob
                .iter()
                .filter(|device| *device != &primary)
                .filter(|device| world.session(&alice, device).is_ok_and(|r| r.current().is_some()))
                .count();
            info!(?status, siblings_still_live = live, "rebuilt with new identity");
        },
        Err(error) => info!(%error, "new identity refused"),
    }

    if let Some(sink) = world.sink(&alice) {
        for message in &sink.system_messages {
            info!(%message, "system message");
        }
    }
    world.check_invariants()?;
    info!("invariants hold");

    Ok(())
}
