//! Deterministic simulation harness for Keystone session establishment.
//!
//! Every key, sequence number and timestamp is drawn from a seeded
//! [`SimEnv`], and every message travels through an in-memory
//! [`SimNetwork`], so a failing run can be replayed exactly from its seed.
//!
//! # Components
//!
//! - [`SimEnv`]: seeded `ChaCha20` randomness and a virtual clock
//! - [`ChaoticStorage`]: storage wrapper that fails commits on demand or at a
//!   seeded rate
//! - [`SimDevice`]: one device of one account, with its own store, prekeys
//!   and processor
//! - [`SimWorld`]: devices wired together by per-link FIFO queues
//!
//! # Model-Based Testing
//!
//! [`Operation`] is generated by proptest and applied to a [`SimWorld`];
//! after each operation the world's storage invariants are checked.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chaotic_storage;
mod device;
mod network;
mod operation;
mod sim_env;
mod world;

pub use chaotic_storage::ChaoticStorage;
pub use device::{RecordingSink, SimDevice};
pub use network::{Envelope, SimNetwork};
pub use operation::Operation;
pub use sim_env::SimEnv;
pub use world::{SimWorld, WorldError};
