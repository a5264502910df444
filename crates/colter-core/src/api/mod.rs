//! HTTP clients for the metric sources.
//!
//! `GithubSource` reads repository statistics from the GitHub REST API with
//! a bearer token. `PypiSource` reads download statistics from pypistats.org
//! and the latest release from pypi.org. Both implement `MetricSource` and
//! share the rate-limit aware `get_json` helper.

pub mod error;
pub mod github;
pub mod pypi;

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use error::SourceFetchError;
pub use github::GithubSource;
pub use pypi::PypiSource;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting
const INITIAL_BACKOFF_MS: u64 = 1000;

/// GitHub rejects requests without a User-Agent
const USER_AGENT: &str = concat!("colter/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
}

/// Send the request built by `build`, retrying with exponential backoff
/// while the server answers 429, and decode the JSON body.
pub(crate) async fn get_json<T, F>(url: &str, build: F) -> Result<T, SourceFetchError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        let response = build().send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(url, %status, "Request succeeded");
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| {
                SourceFetchError::InvalidResponse(format!("Failed to parse {}: {}", url, e))
            });
        }

        if status.as_u16() == 429 {
            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(SourceFetchError::RateLimited);
            }
            warn!(url, retry = retries, backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(SourceFetchError::from_status(status, &body));
    }
}
