//! Error taxonomy surfaced by the request pipeline
//!
//! A failed logical call surfaces exactly one of these. Refresh failures are
//! never a separate kind: a request that was waiting on a failed refresh gets
//! back the error that made it wait in the first place.

use std::fmt;

/// Errors from a logical API call.
///
/// `Clone + PartialEq` so a classified error can be compared and reproduced;
/// classifying the same outcome twice yields equal errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Transport(TransportError),

    #[error("no response received from server")]
    NoResponse,

    #[error("response data is empty")]
    NoData,

    #[error("server error [{status_code}]: {}", message.as_deref().unwrap_or("unknown error"))]
    Server {
        status_code: u16,
        message: Option<String>,
    },

    #[error("failed to decode response: {0}")]
    Decoding(String),

    #[error("failed to encode request body: {0}")]
    Encoding(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status for `Server` errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Server { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::NoResponse => "no_response",
            Error::NoData => "no_data",
            Error::Server { .. } => "server",
            Error::Decoding(_) => "decoding",
            Error::Encoding(_) => "encoding",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Config(_) => "config",
        }
    }
}

/// Broad category of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// Failure while reading or decoding the response body stream
    Body,
    /// The request could not be built or sent
    Request,
    Other,
}

impl TransportErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Other => "other",
        }
    }
}

/// Cloneable snapshot of an underlying dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind.label())
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_body() || e.is_decode() {
            TransportErrorKind::Body
        } else if e.is_builder() || e.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, Error>;
