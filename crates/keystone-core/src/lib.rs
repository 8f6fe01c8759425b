//! Keystone session layer.
//!
//! Establishes, persists and trusts per-peer ratchet sessions. All protocol
//! logic is Sans-IO: operations run against a locked [`SessionGuard`] and
//! return [`SessionAction`]s that the caller executes once the lock is
//! released.
//!
//! ## Architecture
//!
//! ```text
//! keystone-core
//!   ├─ KeyExchangeProcessor (bundle + interactive handshakes)
//!   ├─ IdentityManager      (trust on first use, verification state)
//!   ├─ SessionStore         (per-account lock, archive/query)
//!   ├─ Storage              (durable records, atomic WriteBatch)
//!   └─ Environment          (time + randomness)
//! ```
//!
//! ## Locking
//!
//! Each account owns one [`SessionStore`]. [`SessionStore::lock`] returns a
//! guard that every read-modify-write sequence runs under; nested operations
//! receive the same guard instead of locking again. No network I/O happens
//! while the guard is alive: remote bundles are fetched before locking and
//! actions are dispatched after.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod address;
mod config;
mod dispatch;
mod env;
mod error;
pub mod identity;
mod prekeys;
mod processor;
mod ratchet;
pub mod session;
mod system_env;

pub use action::{HandshakeOutcome, HandshakeStatus, SessionAction};
pub use address::{AccountId, PRIMARY_DEVICE_ID, PeerAddress};
pub use config::{DEFAULT_LAST_RESORT_PREKEY_ID, SessionConfig, TrustPolicy};
pub use dispatch::{ActionSink, DispatchReport, dispatch};
pub use env::Environment;
pub use error::{SessionError, StorageError};
pub use identity::{
    GroupDirectory, IdentityManager, IdentityNotice, IdentityRecord, IdentityUpdate,
    NoGroups, VerifiedStatus,
};
pub use prekeys::{MemoryPreKeyStore, PreKeyStore};
pub use processor::KeyExchangeProcessor;
pub use ratchet::{RatchetInitializer, TripleDh};
pub use session::{
    HandshakeState, MemoryStorage, PendingKeyExchange, SessionGuard, SessionRecord, SessionState,
    SessionStore, Storage, UnacknowledgedPreKey, WriteBatch,
};
pub use system_env::SystemEnv;
