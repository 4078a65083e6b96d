//! Listing endpoint paging.

use tracing::{debug, warn};

use super::{FeedClient, NEXT_PAGE_HEADER};
use crate::error::{Error, Result};
use crate::types::{ContentPointer, ListingPage};

impl FeedClient {
    /// Fetch one listing page
    ///
    /// `query` is appended after `?` verbatim. Single attempt; a non-success status
    /// is returned as [`Error::HttpStatus`] and the caller decides whether that ends
    /// the feed or fails the run.
    pub async fn fetch_page(&self, base_url: &str, query: &str) -> Result<ListingPage> {
        let url = if query.is_empty() {
            base_url.to_string()
        } else {
            format!("{}?{}", base_url, query.trim_start_matches('?'))
        };

        debug!(url = %url, "fetching listing page");
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %url, "listing request failed");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: base_url.to_string(),
            });
        }

        let continuation = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let body = response.text().await?;
        let pointers: Vec<ContentPointer> = if body.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&body)?
        };

        debug!(
            pointers = pointers.len(),
            has_next = continuation.is_some(),
            "listing page received"
        );
        Ok(ListingPage {
            pointers,
            continuation,
        })
    }
}

/// Query string of a continuation URI (the text after the first `?`)
///
/// # Errors
/// Returns [`Error::InvalidContinuation`] when the URI has no query or an empty one
pub fn continuation_query(next_page_uri: &str) -> Result<String> {
    match next_page_uri.split_once('?') {
        Some((_, query)) if !query.is_empty() => Ok(query.to_string()),
        _ => Err(Error::InvalidContinuation(next_page_uri.to_string())),
    }
}
