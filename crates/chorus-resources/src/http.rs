//! Shared HTTP client.

use std::time::Duration;

use reqwest::ClientBuilder;
use tracing::debug;

use crate::error::ResourceResult;

/// Builds the shared client with the bot's `User-Agent` and request timeout.
pub fn build_client(user_agent: &str, timeout: Duration) -> ResourceResult<reqwest::Client> {
    let client = ClientBuilder::new()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?;
    debug!(user_agent = %user_agent, timeout = ?timeout, "Built HTTP client");
    Ok(client)
}
