//! Keystone Cryptographic Primitives
//!
//! Key material, Diffie-Hellman agreement, and the reference ratchet
//! initialization used when a handshake completes.
//!
//! # Design
//!
//! All functions in this crate are pure. Randomness never enters here: key
//! pairs are built from caller-provided secret bytes, so the session layer
//! can drive generation from its `Environment` and tests stay deterministic.
//!
//! # Security Properties
//!
//! - Forward Secrecy: chain keys are replaced by their successor on every step
//! - Mutual authentication: both identity keys are bound into the root key
//!   through two cross DH agreements
//! - Contributory agreement: low-order peer keys are rejected

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod chain;
mod error;
mod keys;
mod ratchet;

pub use chain::{ChainKey, MessageKey};
pub use error::CryptoError;
pub use keys::{KEY_SIZE, KeyPair, PublicKey, SecretKey};
pub use ratchet::{RatchetParameters, RatchetState, initialize_session};
