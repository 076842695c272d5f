//! One logical call: adapt, dispatch, classify, then decode or retry once
//!
//! ```text
//! descriptor ──► adapter.attach ──► transport.dispatch ──► classifier.classify
//!                    ▲                                          │
//!                    │ Retry (attempt 0 only)        error      │ success
//!                    └──────── coordinator.on_failure ◄─────────┤
//!                                                               ▼
//!                                                       codec.decode ──► T
//! ```
//!
//! The adapter runs again before the retry, so the second dispatch carries
//! the token the refresh just persisted.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use crate::adapter::RequestAdapter;
use crate::classify::ErrorClassifier;
use crate::codec::{BodyCodec, JsonCodec};
use crate::coordinator::{Decision, RefreshCoordinator};
use crate::error::{Error, Result};
use crate::metrics;
use crate::request::RequestDescriptor;
use crate::response::{ApiResponse, TransportOutcome};
use crate::transport::Transport;

/// Request pipeline shared by every call a client makes.
pub struct RequestPipeline<C = JsonCodec> {
    adapter: Arc<dyn RequestAdapter>,
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn ErrorClassifier>,
    coordinator: RefreshCoordinator,
    codec: C,
    default_headers: HeaderMap,
}

impl<C: BodyCodec> RequestPipeline<C> {
    pub fn new(
        adapter: Arc<dyn RequestAdapter>,
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn ErrorClassifier>,
        coordinator: RefreshCoordinator,
        codec: C,
        default_headers: HeaderMap,
    ) -> Self {
        Self {
            adapter,
            transport,
            classifier,
            coordinator,
            codec,
            default_headers,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Run the call and return the decoded body.
    pub async fn send<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> Result<T> {
        self.send_with_response(descriptor).await.map(|r| r.value)
    }

    /// Run the call and return the decoded body with the raw bytes and status.
    pub async fn send_with_response<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse<T>> {
        let method = descriptor.method.clone();
        let request_id = format!("req_{}", Uuid::new_v4().as_simple());
        let span = info_span!(
            "api_request",
            request_id = %request_id,
            method = %method,
            url = %descriptor.url
        );

        let result = self.run(descriptor).instrument(span).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_request(method.as_str(), outcome);
        result
    }

    async fn run<T: DeserializeOwned>(
        &self,
        mut descriptor: RequestDescriptor,
    ) -> Result<ApiResponse<T>> {
        loop {
            let attempt = descriptor.retry_attempt();
            let adapted = self.adapter.attach(descriptor.clone()).await?;
            let prepared = adapted.prepare(&self.default_headers);

            debug!(attempt, "dispatching request");
            metrics::record_dispatch(attempt);
            let outcome = self.transport.dispatch(prepared).await;

            let error = match self.classifier.classify(&outcome) {
                None => return self.decode(outcome),
                Some(e) => e,
            };
            debug!(attempt, error = %error, "request failed");

            match self.coordinator.on_failure(&descriptor, error).await {
                Decision::Retry => {
                    debug!("retrying with refreshed credentials");
                    descriptor.mark_retried();
                }
                Decision::Fail(error) => return Err(error),
            }
        }
    }

    /// Response and body are checked again here since a custom classifier may
    /// report success for an outcome that has neither.
    fn decode<T: DeserializeOwned>(&self, outcome: TransportOutcome) -> Result<ApiResponse<T>> {
        let meta = outcome.response.ok_or(Error::NoResponse)?;
        let data = outcome.body.ok_or(Error::NoData)?;
        let value = self.codec.decode(&data)?;
        Ok(ApiResponse { value, data, meta })
    }
}
