//! Serialization collaborator.
//!
//! The core never picks a wire format on its own. Payloads travel as
//! [`serde_json::Value`] between the compute step and the [`Mapper`]; a
//! [`Codec`] turns that value into bytes on the way out and bytes back into a
//! value on the way in. [`Json`] is the one shipped here.
//!
//! [`Mapper`]: crate::Mapper

use bytes::Bytes;
use serde_json::Value;

use crate::error::BoxError;

/// Encodes payload values to bytes and decodes request bodies.
pub trait Codec: Send + Sync + 'static {
    /// The `content-type` written next to encoded payloads.
    fn content_type(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Bytes, BoxError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, BoxError>;
}

/// Compact JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Codec for Json {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, BoxError> {
        Ok(serde_json::to_vec(value)?.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, BoxError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
