//! Request descriptors and the prepared form handed to the transport
//!
//! A `RequestDescriptor` describes one logical call: method, target, headers,
//! body policy, and the retry-attempt counter. The counter starts at 0 for every
//! new descriptor and is only ever advanced by the pipeline that owns it, so a
//! logical call can never inherit another call's retry budget.

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

/// How the request carries its parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Pre-encoded body (e.g. JSON from the client's codec)
    Encoded {
        content_type: &'static str,
        bytes: Bytes,
    },
    /// Parameters appended to the URL query string
    Query(Vec<(String, String)>),
    /// `application/x-www-form-urlencoded` body
    Form(Vec<(String, String)>),
}

/// One logical API call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Absolute URL, already resolved against the client's base URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    retry_attempt: u32,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            retry_attempt: 0,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add string headers, rejecting names or values that are not valid HTTP.
    pub fn with_headers<'a>(
        mut self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidRequest(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidRequest(format!("invalid value for {name}: {e}")))?;
            self.headers.insert(name, value);
        }
        Ok(self)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// 0 on the first dispatch, 1 on the single permitted retry.
    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retry_attempt += 1;
    }

    /// Resolve the body policy into the wire-level request.
    ///
    /// `defaults` are applied only where the descriptor sets no value.
    pub(crate) fn prepare(self, defaults: &HeaderMap) -> PreparedRequest {
        let mut headers = self.headers;
        for (name, value) in defaults {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        let mut url = self.url;
        let body = match self.body {
            RequestBody::Empty => None,
            RequestBody::Encoded {
                content_type,
                bytes,
            } => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                Some(bytes)
            }
            RequestBody::Query(pairs) => {
                if !pairs.is_empty() {
                    let separator = if url.contains('?') { '&' } else { '?' };
                    url.push(separator);
                    url.push_str(&url_encode_pairs(&pairs));
                }
                None
            }
            RequestBody::Form(pairs) => {
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                Some(Bytes::from(url_encode_pairs(&pairs)))
            }
        };

        PreparedRequest {
            method: self.method,
            url,
            headers,
            body,
        }
    }
}

/// Fully resolved request, ready for dispatch.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PreparedRequest {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn url_encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
