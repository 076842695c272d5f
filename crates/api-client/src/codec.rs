//! Body codecs
//!
//! The pipeline never touches serde directly; it asks the client's codec to
//! encode request bodies and decode successful responses.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Encodes request bodies and decodes response bodies.
///
/// Generic methods keep this trait out of `dyn`; the client is generic over
/// its codec instead, defaulting to `JsonCodec`.
pub trait BodyCodec: Send + Sync + 'static {
    /// Value sent as `Content-Type` with encoded bodies.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON codec backed by `serde_json`.
///
/// An empty (or whitespace-only) body decodes as JSON `null`, so unit-like
/// targets (`()`, `EmptyResponse`, `Option<T>`) succeed on 204 responses
/// without any bytes to parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::Encoding(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| Error::Decoding(format!("empty body: {e}")));
        }
        serde_json::from_slice(bytes).map_err(|e| Error::Decoding(e.to_string()))
    }
}
