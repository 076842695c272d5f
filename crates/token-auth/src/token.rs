//! Token pair and the refresh operation
//!
//! The refresh operation is supplied by the embedding application. It gets the
//! current refresh token and returns a brand new pair; the coordinator calls it
//! at most once per refresh cycle. Two ways to supply it:
//! - `refresher_fn`, wrapping an async closure
//! - `HttpTokenRefresher`, POSTing the refresh token as JSON to an endpoint

use std::fmt;
use std::future::Future;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::BoxFuture;
use crate::error::{Error, Result};

/// Access and refresh token issued together by one successful refresh.
///
/// Accepts both snake_case and camelCase field names on input.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Exchanges a refresh token for a new token pair.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair>>;
}

/// `TokenRefresher` backed by an async closure.
pub struct FnRefresher<F>(F);

/// Wrap an async closure `Fn(String) -> impl Future<Output = Result<TokenPair>>`.
pub fn refresher_fn<F, Fut>(f: F) -> FnRefresher<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TokenPair>> + Send + 'static,
{
    FnRefresher(f)
}

impl<F, Fut> TokenRefresher for FnRefresher<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TokenPair>> + Send + 'static,
{
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair>> {
        Box::pin((self.0)(refresh_token.to_owned()))
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

/// Refresh endpoint client.
///
/// Sends `{"refresh_token": ..}` (plus `client_id`/`client_secret` when set)
/// and expects a body containing the new access and refresh tokens. Extra
/// fields such as `expires_in` are ignored.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    client_secret: Option<Secret<String>>,
}

impl HttpTokenRefresher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            client_id: None,
            client_secret: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_client_secret(mut self, secret: Secret<String>) -> Self {
        self.client_secret = Some(secret);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request_pair(&self, refresh: &str) -> Result<TokenPair> {
        let body = RefreshRequest {
            refresh_token: refresh,
            client_id: self.client_id.as_deref(),
            client_secret: self.client_secret.as_ref().map(|s| s.expose().as_str()),
        };

        debug!(endpoint = %self.endpoint, "requesting token refresh");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            // 401/403 means the refresh token is revoked or invalid
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(format!(
                    "refresh token rejected ({status}): {body}"
                )));
            }

            return Err(Error::Refresh(format!(
                "refresh endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenPair>()
            .await
            .map_err(|e| Error::Refresh(format!("invalid refresh response: {e}")))
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenPair>> {
        Box::pin(self.request_pair(refresh_token))
    }
}
