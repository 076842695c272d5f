//! Error classification for transport outcomes
//!
//! Turns a raw `TransportOutcome` into either success (`None`) or one error of
//! the pipeline taxonomy. The classifier also decides which classified errors
//! mean "credential expired"; the coordinator consults it before starting a
//! refresh but still enforces the one-retry limit on its own.

use crate::error::Error;
use crate::response::TransportOutcome;

/// Pluggable outcome classification policy.
pub trait ErrorClassifier: Send + Sync {
    /// `None` means the outcome is a success and should be decoded.
    fn classify(&self, outcome: &TransportOutcome) -> Option<Error>;

    /// Whether `error` means the access token expired and a refresh may help.
    fn is_credential_expired(&self, error: &Error) -> bool {
        error.status_code() == Some(401)
    }
}

/// Default policy:
/// 1. a transport failure wins and is wrapped as `Transport`
/// 2. no response at all is `NoResponse`
/// 3. any non-2xx status is `Server`, with the body as text when it is UTF-8
/// 4. everything else is success, whether or not a body is present
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, outcome: &TransportOutcome) -> Option<Error> {
        if let Some(error) = &outcome.error {
            return Some(Error::Transport(error.clone()));
        }

        let response = match &outcome.response {
            Some(r) => r,
            None => return Some(Error::NoResponse),
        };

        if response.status.is_success() {
            return None;
        }

        let message = outcome
            .body
            .as_ref()
            .and_then(|b| std::str::from_utf8(b).ok())
            .map(str::to_owned);

        Some(Error::Server {
            status_code: response.status.as_u16(),
            message,
        })
    }
}
