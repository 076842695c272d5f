//! Client-side metrics
//!
//! Recorded through the `metrics` facade; without an installed recorder every
//! call here is a no-op. The embedding application decides whether to install
//! one (e.g. `metrics-exporter-prometheus`).
//!
//! - `api_client_requests_total` (counter): labels `method`, `outcome`
//! - `api_client_dispatches_total` (counter): label `attempt`
//! - `api_client_token_refresh_total` (counter): label `outcome`
//! - `api_client_refresh_waiters` (histogram): waiters resolved per refresh cycle

/// Record a finished logical call. `outcome` is `"success"` or an error kind.
pub fn record_request(method: &str, outcome: &str) {
    metrics::counter!(
        "api_client_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one transport dispatch (attempt 0 or the single retry).
pub fn record_dispatch(attempt: u32) {
    metrics::counter!("api_client_dispatches_total", "attempt" => attempt.to_string())
        .increment(1);
}

/// Record the end of a refresh cycle and how many waiters it resolved.
pub fn record_refresh(outcome: &'static str, waiters: usize) {
    metrics::counter!("api_client_token_refresh_total", "outcome" => outcome).increment(1);
    metrics::histogram!("api_client_refresh_waiters").record(waiters as f64);
}
