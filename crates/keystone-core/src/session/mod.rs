//! Session records, their storage, and the per-account store.

pub mod record;
pub mod storage;
pub mod store;

pub use record::{
    ARCHIVED_STATES_MAX_LENGTH, PendingKeyExchange, SessionRecord, SessionState,
    UnacknowledgedPreKey,
};
pub use storage::{MemoryStorage, Storage, WriteBatch};
pub use store::{HandshakeState, SessionGuard, SessionStore};
