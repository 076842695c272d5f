//! Credential side of the authenticated API client
//!
//! Owns everything about the token pair itself and nothing about requests:
//! the `CredentialStore` contract (with in-memory and JSON-file backends) and
//! the `TokenRefresher` contract that exchanges a refresh token for a new pair.
//! The request pipeline in `api-client` only talks to these two traits.
//!
//! Credential flow:
//! 1. The application seeds the store (`save_pair`) after its own login flow
//! 2. Every request reads `access_token()` to build the Authorization header
//! 3. On an expired credential the coordinator reads `refresh_token()` and calls
//!    `TokenRefresher::refresh` exactly once per refresh cycle
//! 4. The new pair is persisted with `save_pair` before any queued request retries
//! 5. The application calls `clear()` on logout

pub mod credentials;
pub mod error;
pub mod token;

use std::future::Future;
use std::pin::Pin;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredTokens};
pub use error::{Error, Result};
pub use token::{FnRefresher, HttpTokenRefresher, TokenPair, TokenRefresher, refresher_fn};

/// Boxed future returned by the object-safe traits in this workspace.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
