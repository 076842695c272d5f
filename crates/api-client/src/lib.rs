//! Authenticated REST client with transparent token refresh
//!
//! Every call goes through one `RequestPipeline`: the `RequestAdapter` attaches
//! the current access token, the `Transport` dispatches, the `ErrorClassifier`
//! turns the outcome into success or one `Error`. A credential-expired error on
//! the first attempt is handed to the `RefreshCoordinator`, which runs at most
//! one refresh at a time no matter how many calls fail together, persists the
//! new pair, and lets each waiting call retry exactly once.
//!
//! ```no_run
//! # async fn demo() -> api_client::Result<()> {
//! use std::sync::Arc;
//! use api_client::ApiClient;
//! use token_auth::{HttpTokenRefresher, MemoryCredentialStore};
//!
//! let client = ApiClient::builder()
//!     .base_url("https://api.example.com/v1")
//!     .credential_store(Arc::new(MemoryCredentialStore::new()))
//!     .refresher(Arc::new(HttpTokenRefresher::new(
//!         reqwest::Client::new(),
//!         "https://api.example.com/v1/auth/refresh",
//!     )))
//!     .build()?;
//!
//! let me: serde_json::Value = client.get("users/me").await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod classify;
pub mod client;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;

pub use adapter::{
    BasicAuthAdapter, BearerTokenAdapter, HeaderInjection, HeaderInjectionAdapter, NoAuthAdapter,
    RequestAdapter,
};
pub use classify::{DefaultErrorClassifier, ErrorClassifier};
pub use client::{ApiClient, ApiClientBuilder, DEFAULT_TIMEOUT};
pub use codec::{BodyCodec, JsonCodec};
pub use coordinator::{Decision, RefreshCoordinator};
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use pipeline::RequestPipeline;
pub use request::{PreparedRequest, RequestBody, RequestDescriptor};
pub use response::{ApiResponse, EmptyResponse, ResponseMeta, TransportOutcome};
pub use transport::{FnTransport, ReqwestTransport, Transport, transport_fn};
