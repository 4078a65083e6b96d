//! Activity feed client
//!
//! - `listing`: one GET per listing page, continuation via `NextPageUri`
//! - `details`: per-pointer detail fetch with retry, bounded fan-out

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};

use crate::config::{FeedConfig, RetryConfig};
use crate::error::{Error, Result};

mod details;
mod listing;

pub use listing::continuation_query;

/// Response header carrying the next listing page
pub const NEXT_PAGE_HEADER: &str = "NextPageUri";

/// HTTP client for the listing and detail endpoints
///
/// Cloning is cheap; clones share one connection pool. The bearer token is fixed
/// for the lifetime of the client, which is one run.
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl FeedClient {
    /// Create a client that authenticates every request with `token`
    ///
    /// # Errors
    /// Returns error if the token is not a valid header value or the HTTP client
    /// cannot be created
    pub fn new(config: &FeedConfig, token: &str) -> Result<Self> {
        Self::with_settings(token, config.request_timeout, config.retry.clone())
    }

    fn with_settings(token: &str, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::Auth(format!("access token is not a valid header value: {}", e)))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, retry })
    }
}
