//! Single-flight token refresh
//!
//! `RefreshCoordinator` decides whether a failed call may be retried and makes
//! sure concurrent credential-expired failures share one refresh.
//!
//! State is `{phase, waiters}` behind one async mutex. Registering a waiter and
//! deciding whether to launch a refresh happen under that lock in one step; the
//! refresh itself runs on a spawned task outside it. On completion the task:
//! 1. persists the new pair (success only)
//! 2. takes the lock, sets `Idle`, and takes every queued waiter
//! 3. releases the lock and resolves each waiter exactly once
//!
//! Because the phase is back to `Idle` before any waiter wakes up, a retried
//! call that fails again can start the next cycle without deadlock. Waiters
//! whose caller was dropped are skipped silently.

use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};
use token_auth::{CredentialStore, TokenRefresher};
use tracing::{debug, info, warn};

use crate::classify::ErrorClassifier;
use crate::error::Error;
use crate::metrics;
use crate::request::RequestDescriptor;

/// What the pipeline should do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Credentials were refreshed; dispatch the call once more.
    Retry,
    /// Surface this error to the caller.
    Fail(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Refreshing,
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Retry,
    Fail,
}

struct State {
    phase: Phase,
    waiters: Vec<oneshot::Sender<Signal>>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    classifier: Arc<dyn ErrorClassifier>,
    state: Mutex<State>,
}

/// Coordinates token refresh for one client. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Without a refresher every credential-expired failure is terminal.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Option<Arc<dyn TokenRefresher>>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                classifier,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Decide between retry and terminal failure for a classified error.
    ///
    /// Only a credential-expired error on the first attempt can lead to
    /// `Retry`. Every other case returns `Fail` with `error` unchanged,
    /// including a failed refresh.
    pub async fn on_failure(&self, descriptor: &RequestDescriptor, error: Error) -> Decision {
        if !self.inner.classifier.is_credential_expired(&error) {
            return Decision::Fail(error);
        }
        if descriptor.retry_attempt() > 0 {
            debug!("credential rejected again after refresh, giving up");
            return Decision::Fail(error);
        }
        let Some(refresher) = self.inner.refresher.clone() else {
            debug!("credential expired but no refresher configured");
            return Decision::Fail(error);
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            if state.phase == Phase::Idle {
                state.phase = Phase::Refreshing;
                state.waiters.clear();
                self.spawn_cycle(refresher);
            } else {
                debug!(waiters = state.waiters.len() + 1, "joining in-flight refresh");
            }
            state.waiters.push(tx);
        }

        match rx.await {
            Ok(Signal::Retry) => Decision::Retry,
            Ok(Signal::Fail) | Err(_) => Decision::Fail(error),
        }
    }

    fn spawn_cycle(&self, refresher: Arc<dyn TokenRefresher>) {
        let inner = Arc::clone(&self.inner);
        info!("starting token refresh");
        tokio::spawn(async move {
            // Run the refresh in its own task so a panic surfaces as a JoinError
            // and the phase still returns to Idle.
            let store = Arc::clone(&inner.store);
            let result =
                tokio::spawn(async move { refresh_and_persist(store.as_ref(), refresher.as_ref()).await })
                    .await;

            let succeeded = match result {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(error = %e, "token refresh failed");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "token refresh task aborted");
                    false
                }
            };
            inner.complete(succeeded).await;
        });
    }
}

impl Inner {
    async fn complete(&self, succeeded: bool) {
        let waiters = {
            let mut state = self.state.lock().await;
            state.phase = Phase::Idle;
            std::mem::take(&mut state.waiters)
        };

        let (signal, outcome) = if succeeded {
            (Signal::Retry, "success")
        } else {
            (Signal::Fail, "failure")
        };
        metrics::record_refresh(outcome, waiters.len());
        info!(outcome, waiters = waiters.len(), "token refresh finished");

        for waiter in waiters {
            // Receiver gone means the caller was cancelled
            let _ = waiter.send(signal);
        }
    }
}

/// Read the refresh token, exchange it, and store the new pair.
async fn refresh_and_persist(
    store: &dyn CredentialStore,
    refresher: &dyn TokenRefresher,
) -> token_auth::Result<()> {
    let refresh_token = store
        .refresh_token()
        .await
        .filter(|t| !t.is_empty())
        .ok_or(token_auth::Error::MissingRefreshToken)?;

    let pair = refresher.refresh(&refresh_token).await?;
    store.save_pair(&pair).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use reqwest::Method;
    use token_auth::{
        BoxFuture, MemoryCredentialStore, StoredTokens, TokenPair, refresher_fn,
    };
    use tokio::sync::Notify;

    use crate::classify::DefaultErrorClassifier;

    fn expired(body: &str) -> Error {
        Error::Server {
            status_code: 401,
            message: Some(body.to_string()),
        }
    }

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, "https://api.example.com/users/me")
    }

    fn coordinator(
        store: Arc<dyn CredentialStore>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(store, refresher, Arc::new(DefaultErrorClassifier))
    }

    fn counting_refresher(calls: Arc<AtomicUsize>) -> Arc<dyn TokenRefresher> {
        Arc::new(refresher_fn(move |_rt: String| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(TokenPair::new("new_a", "new_r"))
            }
        }))
    }

    async fn phase(coordinator: &RefreshCoordinator) -> Phase {
        coordinator.inner.state.lock().await.phase
    }

    async fn wait_for_waiters(coordinator: &RefreshCoordinator, n: usize) {
        loop {
            if coordinator.inner.state.lock().await.waiters.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn non_expired_error_fails_without_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store, Some(counting_refresher(calls.clone())));

        let not_found = Error::Server {
            status_code: 404,
            message: Some(r#"{"error":"Not Found"}"#.into()),
        };
        let decision = coordinator.on_failure(&descriptor(), not_found.clone()).await;

        assert_eq!(decision, Decision::Fail(not_found));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retried_request_is_never_retried_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store, Some(counting_refresher(calls.clone())));

        let mut retried = descriptor();
        retried.mark_retried();
        let decision = coordinator.on_failure(&retried, expired("again")).await;

        assert_eq!(decision, Decision::Fail(expired("again")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_refresher_is_terminal() {
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store, None);
        let decision = coordinator.on_failure(&descriptor(), expired("x")).await;
        assert_eq!(decision, Decision::Fail(expired("x")));
    }

    #[tokio::test]
    async fn successful_refresh_persists_pair_and_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("old_a", "old_r")));
        let coordinator = coordinator(store.clone(), Some(counting_refresher(calls.clone())));

        let decision = coordinator.on_failure(&descriptor(), expired("stale")).await;

        assert_eq!(decision, Decision::Retry);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.access_token().await.as_deref(), Some("new_a"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("new_r"));
        assert_eq!(phase(&coordinator).await, Phase::Idle);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_with_original_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryCredentialStore::new());
        store.save_access_token("only_access").await.unwrap();
        let coordinator = coordinator(store.clone(), Some(counting_refresher(calls.clone())));

        let decision = coordinator.on_failure(&descriptor(), expired("original")).await;

        assert_eq!(decision, Decision::Fail(expired("original")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.snapshot().await,
            StoredTokens {
                access_token: Some("only_access".into()),
                refresh_token: None,
            }
        );
        assert_eq!(phase(&coordinator).await, Phase::Idle);
    }

    #[tokio::test]
    async fn concurrent_failures_share_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let refresher: Arc<dyn TokenRefresher> = {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            Arc::new(refresher_fn(move |_rt: String| {
                let calls = Arc::clone(&calls);
                let gate = Arc::clone(&gate);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(TokenPair::new("new_a", "new_r"))
                }
            }))
        };
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store, Some(refresher));

        let mut handles = Vec::new();
        for i in 0..5 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .on_failure(&descriptor(), expired(&format!("caller {i}")))
                    .await
            }));
        }

        wait_for_waiters(&coordinator, 5).await;
        assert_eq!(phase(&coordinator).await, Phase::Refreshing);
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Decision::Retry);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(phase(&coordinator).await, Phase::Idle);
    }

    #[tokio::test]
    async fn failed_refresh_returns_each_callers_own_error() {
        let gate = Arc::new(Notify::new());
        let refresher: Arc<dyn TokenRefresher> = {
            let gate = Arc::clone(&gate);
            Arc::new(refresher_fn(move |_rt: String| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Err(token_auth::Error::InvalidCredentials("revoked".into()))
                }
            }))
        };
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store.clone(), Some(refresher));

        let mut handles = Vec::new();
        for i in 0..3 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let error = expired(&format!("caller {i}"));
                (error.clone(), coordinator.on_failure(&descriptor(), error).await)
            }));
        }
        wait_for_waiters(&coordinator, 3).await;
        gate.notify_one();

        for handle in handles {
            let (original, decision) = handle.await.unwrap();
            assert_eq!(decision, Decision::Fail(original));
        }
        assert_eq!(store.access_token().await.as_deref(), Some("a"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn panicking_refresher_still_resets_phase() {
        let refresher: Arc<dyn TokenRefresher> =
            Arc::new(refresher_fn(|_rt: String| async move {
                if true {
                    panic!("refresher bug");
                }
                Ok(TokenPair::new("never", "never"))
            }));
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store, Some(refresher));

        let decision = coordinator.on_failure(&descriptor(), expired("x")).await;
        assert_eq!(decision, Decision::Fail(expired("x")));
        assert_eq!(phase(&coordinator).await, Phase::Idle);
    }

    #[tokio::test]
    async fn phase_is_idle_when_waiter_resumes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store, Some(counting_refresher(calls.clone())));

        for _ in 0..2 {
            let decision = coordinator.on_failure(&descriptor(), expired("x")).await;
            assert_eq!(decision, Decision::Retry);
            let state = coordinator.inner.state.lock().await;
            assert_eq!(state.phase, Phase::Idle);
            assert!(state.waiters.is_empty());
        }
        // Two independent cycles
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_block_others() {
        let gate = Arc::new(Notify::new());
        let refresher: Arc<dyn TokenRefresher> = {
            let gate = Arc::clone(&gate);
            Arc::new(refresher_fn(move |_rt: String| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(TokenPair::new("new_a", "new_r"))
                }
            }))
        };
        let store = Arc::new(MemoryCredentialStore::with_pair(&TokenPair::new("a", "r")));
        let coordinator = coordinator(store.clone(), Some(refresher));

        // The launching caller is the one that gets cancelled
        let launcher = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.on_failure(&descriptor(), expired("a")).await })
        };
        wait_for_waiters(&coordinator, 1).await;
        let survivor = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.on_failure(&descriptor(), expired("b")).await })
        };
        wait_for_waiters(&coordinator, 2).await;

        launcher.abort();
        assert!(launcher.await.unwrap_err().is_cancelled());
        gate.notify_one();

        assert_eq!(survivor.await.unwrap(), Decision::Retry);
        assert_eq!(store.access_token().await.as_deref(), Some("new_a"));
        assert_eq!(phase(&coordinator).await, Phase::Idle);
    }

    /// Memory store whose refresh-token writes always fail.
    struct RefreshWriteFails(MemoryCredentialStore);

    impl CredentialStore for RefreshWriteFails {
        fn access_token(&self) -> BoxFuture<'_, Option<String>> {
            self.0.access_token()
        }

        fn refresh_token(&self) -> BoxFuture<'_, Option<String>> {
            self.0.refresh_token()
        }

        fn save_access_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, token_auth::Result<()>> {
            self.0.save_access_token(token)
        }

        fn save_refresh_token<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, token_auth::Result<()>> {
            Box::pin(async { Err(token_auth::Error::Storage("disk full".into())) })
        }

        fn clear(&self) -> BoxFuture<'_, token_auth::Result<()>> {
            self.0.clear()
        }
    }

    #[tokio::test]
    async fn persistence_failure_fails_cycle_and_keeps_old_pair() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(RefreshWriteFails(MemoryCredentialStore::with_pair(
            &TokenPair::new("old_a", "old_r"),
        )));
        let coordinator = coordinator(store.clone(), Some(counting_refresher(calls.clone())));

        let decision = coordinator.on_failure(&descriptor(), expired("stale")).await;

        assert_eq!(decision, Decision::Fail(expired("stale")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.access_token().await.as_deref(), Some("old_a"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("old_r"));
    }

    #[tokio::test]
    async fn persistence_failure_without_access_token_leaves_store_unchanged() {
        let seeded = MemoryCredentialStore::new();
        seeded.save_refresh_token("old_r").await.unwrap();
        let store = Arc::new(RefreshWriteFails(seeded));
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(store.clone(), Some(counting_refresher(calls.clone())));

        let decision = coordinator.on_failure(&descriptor(), expired("stale")).await;

        assert_eq!(decision, Decision::Fail(expired("stale")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.0.snapshot().await,
            StoredTokens {
                access_token: None,
                refresh_token: Some("old_r".into()),
            }
        );
    }
}
