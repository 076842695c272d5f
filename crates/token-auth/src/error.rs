//! Error types for credential storage and token refresh

/// Errors from credential storage and refresh operations.
///
/// None of these reach callers of the request pipeline: a failed refresh
/// resolves every queued request with the error that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential storage error: {0}")]
    Storage(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
