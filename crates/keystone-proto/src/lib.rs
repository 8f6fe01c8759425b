//! Keystone wire formats.
//!
//! Every handshake message shares one framing: a single version byte
//! followed by a CBOR body.
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────┐
//! │ version (1 B)   │ CBOR body                    │
//! │ hi: used        │ {prekey_id, base_key, ...}   │
//! │ lo: minimum     │                              │
//! └─────────────────┴──────────────────────────────┘
//! ```
//!
//! The high nibble is the format version the sender used; the low nibble is
//! the oldest version it can accept back. Decoding fails closed when the used
//! version is newer than [`CURRENT_VERSION`].
//!
//! # Messages
//!
//! - [`PreKeyMessage`]: asynchronous bootstrap handshake
//! - [`KeyExchangeMessage`]: interactive two-way handshake
//! - [`RatchetMessage`]: inner ratchet message carried by a prekey message
//! - [`PreKeyBundle`]: a peer's published prekey, fetched from a directory
//! - [`HandshakeMessage`]: tagged union dispatched by the session layer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod codec;
mod errors;
mod handshake;
mod key_exchange;
mod prekey_message;
mod ratchet_message;
mod version;

pub use bundle::PreKeyBundle;
pub use errors::ProtocolError;
pub use handshake::{HandshakeKind, HandshakeMessage};
pub use key_exchange::{KeyExchangeFlags, KeyExchangeMessage};
pub use prekey_message::PreKeyMessage;
pub use ratchet_message::RatchetMessage;
pub use version::{CURRENT_VERSION, MINIMUM_SUPPORTED_VERSION, VersionByte};
