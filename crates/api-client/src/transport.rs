//! Transport: performs the actual network I/O for a prepared request
//!
//! The pipeline treats the transport as opaque. Timeouts, connection pooling
//! and TLS all live here; the pipeline only ever sees a `TransportOutcome`.

use std::future::Future;
use std::time::Duration;

use token_auth::BoxFuture;
use tracing::debug;

use crate::error::{Error, Result, TransportError};
use crate::request::PreparedRequest;
use crate::response::{ResponseMeta, TransportOutcome};

/// Dispatches prepared requests. May be invoked concurrently.
pub trait Transport: Send + Sync {
    fn dispatch(&self, request: PreparedRequest) -> BoxFuture<'_, TransportOutcome>;
}

/// Default transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a dedicated `reqwest::Client` with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::new(client))
    }

    async fn send(&self, request: PreparedRequest) -> TransportOutcome {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "dispatch failed");
                return TransportOutcome::failed(TransportError::from(e));
            }
        };

        let meta = ResponseMeta {
            status: response.status(),
            headers: response.headers().clone(),
        };
        debug!(status = meta.status.as_u16(), "response received");

        match response.bytes().await {
            Ok(body) => TransportOutcome::completed(meta, body),
            Err(e) => {
                debug!(error = %e, "failed to read response body");
                TransportOutcome {
                    response: Some(meta),
                    body: None,
                    error: Some(TransportError::from(e)),
                }
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn dispatch(&self, request: PreparedRequest) -> BoxFuture<'_, TransportOutcome> {
        Box::pin(self.send(request))
    }
}

/// `Transport` backed by an async closure. Handy for embedding another HTTP
/// engine or scripting responses in tests.
pub struct FnTransport<F>(F);

pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(PreparedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = TransportOutcome> + Send + 'static,
{
    FnTransport(f)
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(PreparedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = TransportOutcome> + Send + 'static,
{
    fn dispatch(&self, request: PreparedRequest) -> BoxFuture<'_, TransportOutcome> {
        Box::pin((self.0)(request))
    }
}
