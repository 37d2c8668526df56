use anyhow::{Context, Result};
use fetch_throttle_lib::{AdmissionController, ThrottledClient};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;

use crate::options::Config;

/// Create the HTTP client all downloads go through
pub(crate) fn create(cfg: &Config, controller: AdmissionController) -> Result<ThrottledClient> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&cfg.user_agent)
            .with_context(|| format!("Invalid user agent `{}`", cfg.user_agent))?,
    );

    let client = reqwest::Client::builder()
        .gzip(true)
        .default_headers(headers)
        .timeout(Duration::from_secs(cfg.timeout))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ThrottledClient::new(client, controller))
}
