//! Credential storage for the access/refresh token pair
//!
//! `CredentialStore` is the contract the request pipeline depends on. Reads are
//! unsynchronized with respect to writes: an adapter simply uses whichever
//! access token is current when it reads. Writes only ever come from the refresh
//! coordinator's completion step (one at a time) or from the owning application
//! (login/logout), so implementations only need "last write wins".
//!
//! Two backends ship with the crate:
//! - `MemoryCredentialStore`, for tests and short-lived processes
//! - `FileCredentialStore`, a JSON file written atomically (temp file + rename)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::error::{Error, Result};
use crate::token::TokenPair;

/// Access/refresh token storage used by the request pipeline.
///
/// Uses boxed futures so stores can be held as `Arc<dyn CredentialStore>`.
pub trait CredentialStore: Send + Sync {
    /// Current access token, if any.
    fn access_token(&self) -> BoxFuture<'_, Option<String>>;

    /// Current refresh token, if any.
    fn refresh_token(&self) -> BoxFuture<'_, Option<String>>;

    fn save_access_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>>;

    fn save_refresh_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Remove both tokens. Clearing an empty store succeeds.
    fn clear(&self) -> BoxFuture<'_, Result<()>>;

    /// Persist a freshly issued pair as one unit.
    ///
    /// The default writes the refresh token then the access token. If the
    /// first write fails nothing has changed. If the second fails, the previous
    /// refresh token is put back (or the store cleared and the previous access
    /// token re-saved when there was none), so the store is never left holding
    /// half of a pair. A failed restore is returned in place of the write
    /// error. Backends that can write both tokens in a single operation should
    /// override this.
    fn save_pair<'a>(&'a self, pair: &'a TokenPair) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let previous_access = self.access_token().await;
            let previous_refresh = self.refresh_token().await;
            self.save_refresh_token(&pair.refresh_token).await?;

            let Err(e) = self.save_access_token(&pair.access_token).await else {
                return Ok(());
            };

            let restored = match previous_refresh {
                Some(ref token) => self.save_refresh_token(token).await,
                None => match self.clear().await {
                    Ok(()) => match previous_access {
                        Some(ref token) => self.save_access_token(token).await,
                        None => Ok(()),
                    },
                    Err(clear) => Err(clear),
                },
            };
            if let Err(restore) = restored {
                warn!(error = %e, restore_error = %restore, "failed to restore credentials");
                return Err(restore);
            }
            Err(e)
        })
    }
}

/// On-disk (and in-memory) representation of the stored pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl From<&TokenPair> for StoredTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
        }
    }
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: RwLock<StoredTokens>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token pair.
    pub fn with_pair(pair: &TokenPair) -> Self {
        Self {
            state: RwLock::new(StoredTokens::from(pair)),
        }
    }

    /// Copy of the current state, for assertions and diagnostics.
    pub async fn snapshot(&self) -> StoredTokens {
        self.state.read().await.clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.state.read().await.access_token.clone() })
    }

    fn refresh_token(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.state.read().await.refresh_token.clone() })
    }

    fn save_access_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state.write().await.access_token = Some(token.to_owned());
            Ok(())
        })
    }

    fn save_refresh_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state.write().await.refresh_token = Some(token.to_owned());
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = StoredTokens::default();
            Ok(())
        })
    }

    fn save_pair<'a>(&'a self, pair: &'a TokenPair) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = StoredTokens::from(pair);
            Ok(())
        })
    }
}

/// JSON-file credential store.
///
/// The Mutex serializes writes. Each write builds the next state, persists it,
/// and only then replaces the in-memory copy, so a failed write leaves both the
/// file and memory unchanged.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<StoredTokens>,
}

impl FileCredentialStore {
    /// Load tokens from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start, logged out).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let tokens: StoredTokens = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                has_access = tokens.access_token.is_some(),
                has_refresh = tokens.refresh_token.is_some(),
                "loaded credentials"
            );
            tokens
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            let tokens = StoredTokens::default();
            write_atomic(&path, &tokens).await?;
            tokens
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn update(&self, apply: impl FnOnce(&mut StoredTokens)) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        apply(&mut next);
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.state.lock().await.access_token.clone() })
    }

    fn refresh_token(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.state.lock().await.refresh_token.clone() })
    }

    fn save_access_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.update(|s| s.access_token = Some(token.to_owned())).await?;
            debug!("saved access token");
            Ok(())
        })
    }

    fn save_refresh_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.update(|s| s.refresh_token = Some(token.to_owned())).await?;
            debug!("saved refresh token");
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.update(|s| *s = StoredTokens::default()).await?;
            info!(path = %self.path.display(), "cleared credentials");
            Ok(())
        })
    }

    fn save_pair<'a>(&'a self, pair: &'a TokenPair) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.update(|s| *s = StoredTokens::from(pair)).await?;
            debug!("saved token pair");
            Ok(())
        })
    }
}

/// Write tokens to a file atomically.
///
/// Writes a temporary file next to the target and renames it over the target.
/// Permissions are 0600 on unix since the file holds bearer tokens.
async fn write_atomic(path: &Path, data: &StoredTokens) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io("credential path has no file name".into()))?;
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
