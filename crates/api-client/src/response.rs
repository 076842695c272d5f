//! Raw transport outcomes and decoded responses

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::{Deserialize, Deserializer, IgnoredAny};
use serde::{Serialize, Serializer};

use crate::error::TransportError;

/// Status line and headers of a received response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseMeta {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

/// Everything the transport learned about one dispatch.
///
/// Any combination is possible: a response whose body failed to stream has
/// `response` and `error` set, a connection failure has only `error`.
#[derive(Debug, Clone, Default)]
pub struct TransportOutcome {
    pub response: Option<ResponseMeta>,
    pub body: Option<Bytes>,
    pub error: Option<TransportError>,
}

impl TransportOutcome {
    /// Response received in full.
    pub fn completed(response: ResponseMeta, body: impl Into<Bytes>) -> Self {
        Self {
            response: Some(response),
            body: Some(body.into()),
            error: None,
        }
    }

    /// Dispatch failed before a response arrived.
    pub fn failed(error: TransportError) -> Self {
        Self {
            response: None,
            body: None,
            error: Some(error),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// Decoded value together with the raw body and response metadata.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub value: T,
    pub data: Bytes,
    pub meta: ResponseMeta,
}

impl<T> ApiResponse<T> {
    pub fn status(&self) -> StatusCode {
        self.meta.status
    }
}

/// Response type for endpoints that return no meaningful body (204, bare
/// DELETE/PUT acknowledgements).
///
/// Decodes from an empty body or from any JSON value, which is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyResponse;

impl<'de> Deserialize<'de> for EmptyResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer)?;
        Ok(EmptyResponse)
    }
}

impl Serialize for EmptyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}
