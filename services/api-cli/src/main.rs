//! API CLI
//!
//! Small command-line front end for the authenticated API client:
//! 1. Loads TOML config (base URL, credential file, refresh endpoint)
//! 2. Opens the JSON credential file and wires the HTTP refresher
//! 3. Sends one request, refreshing the access token if it has expired
//! 4. Prints the decoded JSON response to stdout

mod cli;
mod config;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use api_client::{ApiClient, BearerTokenAdapter, HeaderInjectionAdapter, RequestBody};
use token_auth::{CredentialStore, FileCredentialStore, HttpTokenRefresher, TokenPair};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Command, USAGE};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr so stdout carries only the response
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = cli::parse(&args)?;
    if cli.command == Command::Help {
        print!("{USAGE}");
        return Ok(());
    }

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.client.base_url,
        refresh_url = %config.auth.refresh_url,
        headers = config.headers.len(),
        "configuration loaded"
    );

    let store = Arc::new(
        FileCredentialStore::load(config.auth.credentials_path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to open credential file {}",
                    config.auth.credentials_path.display()
                )
            })?,
    );

    match cli.command {
        Command::Login => login(store.as_ref()).await,
        Command::Logout => {
            let client = build_client(&config, store)?;
            client.logout().await.context("failed to clear credentials")
        }
        Command::Request {
            method,
            path,
            data,
            query,
        } => {
            let client = build_client(&config, store)?;
            let mut descriptor = client.request(method, &path);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data is not valid JSON")?;
                descriptor = client.with_body(descriptor, &body)?;
            }
            if !query.is_empty() {
                descriptor = descriptor.with_body(RequestBody::Query(query));
            }

            let response = client
                .send_with_response::<serde_json::Value>(descriptor)
                .await
                .with_context(|| format!("request to {path} failed"))?;
            info!(status = response.status().as_u16(), "request completed");
            println!("{}", serde_json::to_string_pretty(&response.value)?);
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

fn build_client(config: &Config, store: Arc<FileCredentialStore>) -> Result<ApiClient> {
    let timeout = Duration::from_secs(config.client.timeout_secs);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;

    let mut refresher = HttpTokenRefresher::new(http, config.auth.refresh_url.clone());
    if let Some(ref id) = config.auth.client_id {
        refresher = refresher.with_client_id(id.clone());
    }
    if let Some(ref secret) = config.auth.client_secret {
        refresher = refresher.with_client_secret(secret.clone());
    }

    let adapter = HeaderInjectionAdapter::new(
        &config.headers,
        Arc::new(BearerTokenAdapter::new(store.clone())),
    );

    let client = ApiClient::builder()
        .base_url(config.client.base_url.clone())
        .credential_store(store)
        .refresher(Arc::new(refresher))
        .adapter(Arc::new(adapter))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Seed the store with a token pair read as JSON from stdin.
async fn login(store: &FileCredentialStore) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read token pair from stdin")?;
    let pair: TokenPair =
        serde_json::from_str(&input).context("stdin must be {\"access_token\", \"refresh_token\"}")?;
    store
        .save_pair(&pair)
        .await
        .context("failed to store credentials")?;
    info!(path = %store.path().display(), "credentials stored");
    Ok(())
}
