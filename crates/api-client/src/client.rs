//! `ApiClient`: base URL, per-verb helpers and the builder that wires policies

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use token_auth::{CredentialStore, TokenRefresher};
use tracing::info;

use crate::adapter::{BearerTokenAdapter, RequestAdapter};
use crate::classify::{DefaultErrorClassifier, ErrorClassifier};
use crate::codec::{BodyCodec, JsonCodec};
use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::pipeline::RequestPipeline;
use crate::request::{RequestBody, RequestDescriptor};
use crate::response::ApiResponse;
use crate::transport::{ReqwestTransport, Transport};

/// Per-request timeout used when the builder is not given one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for one REST API and one credential pair.
pub struct ApiClient<C = JsonCodec> {
    base_url: String,
    store: Arc<dyn CredentialStore>,
    pipeline: RequestPipeline<C>,
}

impl ApiClient<JsonCodec> {
    pub fn builder() -> ApiClientBuilder<JsonCodec> {
        ApiClientBuilder::new()
    }
}

impl<C: BodyCodec> ApiClient<C> {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Resolve `path` against the base URL.
    ///
    /// Absolute `http://`/`https://` targets pass through unchanged; relative
    /// paths are joined with exactly one `/`.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, path)
    }

    /// Fresh descriptor for `path`, retry counter at 0.
    pub fn request(&self, method: Method, path: &str) -> RequestDescriptor {
        RequestDescriptor::new(method, self.build_url(path))
    }

    /// Encode `body` with the client's codec and attach it to `descriptor`.
    pub fn with_body<B: Serialize + ?Sized>(
        &self,
        descriptor: RequestDescriptor,
        body: &B,
    ) -> Result<RequestDescriptor> {
        let codec = self.pipeline.codec();
        let bytes = codec.encode(body)?;
        Ok(descriptor.with_body(RequestBody::Encoded {
            content_type: codec.content_type(),
            bytes,
        }))
    }

    pub async fn send<T: DeserializeOwned>(&self, descriptor: RequestDescriptor) -> Result<T> {
        self.pipeline.send(descriptor).await
    }

    pub async fn send_with_response<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse<T>> {
        self.pipeline.send_with_response(descriptor).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path)).await
    }

    /// GET with URL-encoded query parameters.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.send(self.query_request(Method::GET, path, query)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PATCH, path, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::DELETE, path)).await
    }

    pub async fn delete_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.send(self.query_request(Method::DELETE, path, query)).await
    }

    fn query_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> RequestDescriptor {
        let pairs = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.request(method, path).with_body(RequestBody::Query(pairs))
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let descriptor = self.with_body(self.request(method, path), body)?;
        self.send(descriptor).await
    }

    /// Clear stored credentials. Safe to call when already logged out.
    pub async fn logout(&self) -> token_auth::Result<()> {
        self.store.clear().await?;
        info!("credentials cleared");
        Ok(())
    }
}

/// Builder for `ApiClient`. Base URL and credential store are required.
pub struct ApiClientBuilder<C = JsonCodec> {
    base_url: Option<String>,
    store: Option<Arc<dyn CredentialStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    adapter: Option<Arc<dyn RequestAdapter>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    transport: Option<Arc<dyn Transport>>,
    codec: C,
    timeout: Duration,
    default_headers: HeaderMap,
}

impl ApiClientBuilder<JsonCodec> {
    pub fn new() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            base_url: None,
            store: None,
            refresher: None,
            adapter: None,
            classifier: None,
            transport: None,
            codec: JsonCodec,
            timeout: DEFAULT_TIMEOUT,
            default_headers,
        }
    }
}

impl Default for ApiClientBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: BodyCodec> ApiClientBuilder<C> {
    /// Trailing `/` is trimmed.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Defaults to `BearerTokenAdapter` over the credential store.
    pub fn adapter(mut self, adapter: Arc<dyn RequestAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replaces the reqwest transport; `timeout` is then ignored.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Header sent with every request unless the request sets its own.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn codec<C2: BodyCodec>(self, codec: C2) -> ApiClientBuilder<C2> {
        ApiClientBuilder {
            base_url: self.base_url,
            store: self.store,
            refresher: self.refresher,
            adapter: self.adapter,
            classifier: self.classifier,
            transport: self.transport,
            codec,
            timeout: self.timeout,
            default_headers: self.default_headers,
        }
    }

    pub fn build(self) -> Result<ApiClient<C>> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".into()))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base_url must start with http:// or https://, got {base_url:?}"
            )));
        }
        let store = self
            .store
            .ok_or_else(|| Error::Config("credential store is required".into()))?;

        let adapter: Arc<dyn RequestAdapter> = match self.adapter {
            Some(a) => a,
            None => Arc::new(BearerTokenAdapter::new(Arc::clone(&store))),
        };
        let classifier: Arc<dyn ErrorClassifier> = match self.classifier {
            Some(c) => c,
            None => Arc::new(DefaultErrorClassifier),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::with_timeout(self.timeout)?),
        };
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&store), self.refresher, Arc::clone(&classifier));

        Ok(ApiClient {
            base_url,
            store,
            pipeline: RequestPipeline::new(
                adapter,
                transport,
                classifier,
                coordinator,
                self.codec,
                self.default_headers,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use token_auth::MemoryCredentialStore;

    fn client(base: &str) -> ApiClient {
        ApiClient::builder()
            .base_url(base)
            .credential_store(Arc::new(MemoryCredentialStore::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn build_url_joins_with_one_slash() {
        let client = client("https://api.example.com/v1/");
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.build_url("/users"), "https://api.example.com/v1/users");
        assert_eq!(client.build_url("users"), "https://api.example.com/v1/users");
        assert_eq!(client.build_url(""), "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn absolute_urls_pass_through() {
        let client = client("https://api.example.com");
        assert_eq!(
            client.build_url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[tokio::test]
    async fn build_requires_base_url_and_store() {
        let missing_url = ApiClient::builder()
            .credential_store(Arc::new(MemoryCredentialStore::new()))
            .build();
        assert!(matches!(missing_url, Err(Error::Config(ref m)) if m.contains("base_url")));

        let missing_store = ApiClient::builder().base_url("https://api.example.com").build();
        assert!(matches!(missing_store, Err(Error::Config(ref m)) if m.contains("store")));
    }

    #[tokio::test]
    async fn build_rejects_non_http_base_url() {
        let result = ApiClient::builder()
            .base_url("ftp://files.example.com")
            .credential_store(Arc::new(MemoryCredentialStore::new()))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn request_descriptors_start_fresh() {
        let client = client("https://api.example.com");
        let descriptor = client.request(Method::GET, "users");
        assert_eq!(descriptor.retry_attempt(), 0);
        assert_eq!(descriptor.url, "https://api.example.com/users");
    }

    #[tokio::test]
    async fn with_body_uses_codec_content_type() {
        let client = client("https://api.example.com");
        let descriptor = client
            .with_body(client.request(Method::POST, "items"), &serde_json::json!({"a": 1}))
            .unwrap();
        match descriptor.body {
            RequestBody::Encoded {
                content_type,
                bytes,
            } => {
                assert_eq!(content_type, "application/json");
                assert_eq!(&bytes[..], br#"{"a":1}"#);
            }
            other => panic!("expected encoded body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_requests_carry_pairs_for_any_method() {
        let client = client("https://api.example.com");
        let descriptor =
            client.query_request(Method::DELETE, "items", &[("before", "2024-01-01")]);
        assert_eq!(descriptor.method, Method::DELETE);
        assert_eq!(
            descriptor.body,
            RequestBody::Query(vec![("before".into(), "2024-01-01".into())])
        );
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let store = Arc::new(MemoryCredentialStore::with_pair(&token_auth::TokenPair::new(
            "a", "r",
        )));
        let client = ApiClient::builder()
            .base_url("https://api.example.com")
            .credential_store(store.clone())
            .build()
            .unwrap();

        client.logout().await.unwrap();
        client.logout().await.unwrap();
        assert!(store.access_token().await.is_none());
        assert!(store.refresh_token().await.is_none());
    }
}
