//! CBOR helpers shared by the message types.

use bytes::{BufMut, Bytes, BytesMut};
use keystone_crypto::PublicKey;
use serde::{Serialize, de::DeserializeOwned};

use crate::{ProtocolError, VersionByte};

/// Write `version` followed by the CBOR encoding of `body`.
pub(crate) fn frame<T: Serialize>(version: VersionByte, body: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    buf.put_u8(version.to_byte());

    let mut writer = buf.writer();
    ciborium::ser::into_writer(body, &mut writer)
        .map_err(|e| ProtocolError::invalid(format!("CBOR encode: {e}")))?;

    Ok(writer.into_inner().freeze())
}

/// Decode a CBOR body.
pub(crate) fn body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    ciborium::de::from_reader(bytes)
        .map_err(|e| ProtocolError::invalid(format!("CBOR decode: {e}")))
}

/// Unwrap a required field.
pub(crate) fn required<T>(field: Option<T>, name: &str) -> Result<T, ProtocolError> {
    field.ok_or_else(|| ProtocolError::invalid(format!("incomplete message: missing {name}")))
}

/// Unwrap a required key field and check its length.
pub(crate) fn required_key(field: Option<Vec<u8>>, name: &str) -> Result<PublicKey, ProtocolError> {
    let raw = required(field, name)?;
    PublicKey::from_slice(&raw).ok_or_else(|| {
        ProtocolError::invalid(format!("{name}: expected 32 bytes, got {}", raw.len()))
    })
}
