//! Randomized operations for model-based testing.

use arbitrary::Arbitrary;
use keystone_core::{SessionError, StorageError};

use crate::{SimWorld, WorldError};

/// Upper bound on messages one [`Operation::DeliverAll`] delivers.
const DELIVER_ALL_LIMIT: usize = 64;

/// One step against a [`SimWorld`].
///
/// Device indices are taken modulo the number of devices, so any generated
/// value names a real device. Steps whose two devices coincide do nothing.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Open an interactive exchange.
    Initiate {
        /// Initiating device.
        from: u8,
        /// Target device.
        to: u8,
    },
    /// Fetch a bundle, build a session and send the first message.
    SendPrekeyMessage {
        /// Sending device.
        from: u8,
        /// Bundle owner.
        to: u8,
    },
    /// Deliver the oldest message on one link.
    Deliver {
        /// Sending device.
        from: u8,
        /// Receiving device.
        to: u8,
    },
    /// Deliver until the network is idle.
    DeliverAll,
    /// Give the account owning a device a new identity key.
    RotateIdentity {
        /// Any device of the account.
        device: u8,
    },
    /// Fail the next storage commit on a device.
    FailNextCommit {
        /// Target device.
        device: u8,
    },
    /// Move the clock forward.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

impl Operation {
    /// Apply the step.
    ///
    /// Failures the protocol produces by design under randomized input
    /// (refused identities, consumed prekeys, injected storage faults) are
    /// absorbed. Anything else is returned.
    pub fn apply(&self, world: &mut SimWorld) -> Result<(), WorldError> {
        let addresses = world.addresses();
        if addresses.is_empty() {
            return Ok(());
        }
        let pick = |index: u8| addresses[usize::from(index) % addresses.len()].clone();

        let result = match *self {
            Self::Initiate { from, to } => {
                let (from, to) = (pick(from), pick(to));
                if from.name == to.name {
                    return Ok(());
                }
                world.initiate(&from, &to).map(drop)
            },
            Self::SendPrekeyMessage { from, to } => {
                let (from, to) = (pick(from), pick(to));
                if from.name == to.name {
                    return Ok(());
                }
                world
                    .establish_from_bundle(&from, &to)
                    .and_then(|_| world.send_prekey_message(&from, &to))
                    .map(drop)
            },
            Self::Deliver { from, to } => world.deliver(&pick(from), &pick(to)).map(drop),
            Self::DeliverAll => world.deliver_all(DELIVER_ALL_LIMIT).map(drop),
            Self::RotateIdentity { device } => {
                world.rotate_identity(&pick(device).name);
                Ok(())
            },
            Self::FailNextCommit { device } => world.fail_next_commit(&pick(device)),
            Self::AdvanceTime { millis } => {
                world.env().advance(u64::from(millis));
                Ok(())
            },
        };

        match result {
            Err(error) if error.session_error().is_some_and(is_expected) => Ok(()),
            other => other,
        }
    }
}

fn is_expected(error: &SessionError) -> bool {
    matches!(
        error,
        SessionError::TrustRejected { .. }
            | SessionError::InvalidKeyId { .. }
            | SessionError::Storage(StorageError::Unavailable { .. })
    )
}
