use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

/// Shared HTTP client for alert backends. The request timeout bounds a single
/// backend call; the cache applies its own overall fetch timeout on top.
pub fn build_http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}
