use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{RemoteErrorKind, RestmxError, Result};
use crate::protocol::RemoteException;

/// Codec for request and response bodies
///
/// JSON is the only format the management protocol speaks, but the enum keeps
/// the body format a single swappable value.
///
/// # Example
///
/// ```
/// use restmx_common::transport::Codec;
/// use restmx_common::protocol::Attribute;
/// use serde_json::json;
///
/// let codec = Codec::new();
/// let attribute = Attribute::new("Size", json!(42));
///
/// let encoded = codec.encode(&attribute).unwrap();
/// let decoded: Attribute = codec.decode(&encoded).unwrap();
/// assert_eq!(decoded, attribute);
/// ```
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    Json(JsonCodec),
}

impl Codec {
    pub fn new() -> Self {
        Codec::Json(JsonCodec)
    }

    /// Encodes a value into a request body.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode(value),
        }
    }

    /// Decodes a response body into the expected shape.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json(_) => JsonCodec::decode(data),
        }
    }

    /// Decodes a 400/500 body into the error it describes.
    ///
    /// Never fails: a body that is not a structured exception still yields a
    /// generic remote error carrying whatever text the server sent.
    pub fn decode_remote_exception(&self, data: &[u8]) -> RestmxError {
        match self {
            Codec::Json(_) => JsonCodec::decode_remote_exception(data),
        }
    }

    /// Content type of encoded bodies.
    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::Json(_) => "application/json",
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON body codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| {
            RestmxError::InvalidResponse(format!("undecodable body ({} bytes): {}", data.len(), e))
        })
    }

    pub fn decode_remote_exception(data: &[u8]) -> RestmxError {
        match serde_json::from_slice::<RemoteException>(data) {
            Ok(exception) => exception.into_error(),
            Err(_) => RestmxError::RemoteOperation {
                kind: RemoteErrorKind::Other("unknown".to_string()),
                message: String::from_utf8_lossy(data).trim().to_string(),
            },
        }
    }
}
