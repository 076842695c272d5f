//! Request adapters: attach credentials and static headers to a descriptor
//!
//! An adapter gets a copy of the descriptor for every dispatch, including the
//! retry, so a retried request always carries whatever the store holds at that
//! moment.

use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use serde::Deserialize;
use token_auth::{BoxFuture, CredentialStore};
use tracing::warn;

use crate::error::{Error, Result};
use crate::request::RequestDescriptor;

/// Attaches authentication to an outgoing request.
pub trait RequestAdapter: Send + Sync {
    fn attach(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<RequestDescriptor>>;
}

/// Adds `Authorization: Bearer <access token>` when the store has a token.
///
/// Without a token (or with an empty one) the descriptor passes through
/// unchanged.
pub struct BearerTokenAdapter {
    store: Arc<dyn CredentialStore>,
}

impl BearerTokenAdapter {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

impl RequestAdapter for BearerTokenAdapter {
    fn attach(&self, mut descriptor: RequestDescriptor) -> BoxFuture<'_, Result<RequestDescriptor>> {
        Box::pin(async move {
            let token = self.store.access_token().await.filter(|t| !t.is_empty());
            if let Some(token) = token {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| Error::InvalidRequest(format!("invalid access token value: {e}")))?;
                descriptor.headers.insert(AUTHORIZATION, value);
            }
            Ok(descriptor)
        })
    }
}

/// Adds `Authorization: Basic base64(username:password)`.
pub struct BasicAuthAdapter {
    header: HeaderValue,
}

impl BasicAuthAdapter {
    pub fn new(username: &str, password: &str) -> Result<Self> {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| Error::Config(format!("invalid basic auth credentials: {e}")))?;
        header.set_sensitive(true);
        Ok(Self { header })
    }
}

impl RequestAdapter for BasicAuthAdapter {
    fn attach(&self, mut descriptor: RequestDescriptor) -> BoxFuture<'_, Result<RequestDescriptor>> {
        descriptor.headers.insert(AUTHORIZATION, self.header.clone());
        Box::pin(async move { Ok(descriptor) })
    }
}

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Injects static headers, then defers to an inner adapter for credentials.
///
/// Invalid names/values are skipped with a warning. An injection can never
/// set `Authorization`; that header belongs to the inner adapter.
pub struct HeaderInjectionAdapter {
    headers: Vec<(HeaderName, HeaderValue)>,
    inner: Arc<dyn RequestAdapter>,
}

impl HeaderInjectionAdapter {
    pub fn new(injections: &[HeaderInjection], inner: Arc<dyn RequestAdapter>) -> Self {
        let mut headers = Vec::with_capacity(injections.len());
        for injection in injections {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == AUTHORIZATION {
                warn!(header = %injection.name, "refusing to inject authorization header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.push((name, value));
        }
        Self { headers, inner }
    }
}

impl RequestAdapter for HeaderInjectionAdapter {
    fn attach(&self, mut descriptor: RequestDescriptor) -> BoxFuture<'_, Result<RequestDescriptor>> {
        for (name, value) in &self.headers {
            descriptor.headers.insert(name.clone(), value.clone());
        }
        self.inner.attach(descriptor)
    }
}

/// Leaves every request untouched (public endpoints).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthAdapter;

impl RequestAdapter for NoAuthAdapter {
    fn attach(&self, descriptor: RequestDescriptor) -> BoxFuture<'_, Result<RequestDescriptor>> {
        Box::pin(async move { Ok(descriptor) })
    }
}
