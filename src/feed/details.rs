//! Detail fetches with retry and bounded fan-out.

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::FeedClient;
use crate::error::{Error, Result};
use crate::retry::fetch_with_retry;
use crate::types::{ContentPointer, DetailRecord};

impl FeedClient {
    /// Fetch the detail records behind one content pointer
    ///
    /// Transient failures are retried per the client's [`RetryConfig`](crate::config::RetryConfig).
    /// A client-request error or exhausted retries yield an empty batch; the run
    /// carries on with the other pointers.
    pub async fn fetch_details(&self, pointer: &ContentPointer) -> Vec<DetailRecord> {
        let uri = pointer.content_uri.as_str();
        match fetch_with_retry(&self.retry, || self.try_fetch_details(uri)).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    content_id = %pointer.content_id,
                    error = %e,
                    "giving up on content pointer"
                );
                Vec::new()
            }
        }
    }

    /// Fetch every pointer with at most `concurrency` requests in flight
    ///
    /// Each request owns its batch; batches are concatenated by the collecting task
    /// in completion order.
    pub async fn fetch_all_details(
        &self,
        pointers: &[ContentPointer],
        concurrency: usize,
    ) -> Vec<DetailRecord> {
        let batches: Vec<Vec<DetailRecord>> = stream::iter(pointers.to_vec())
            .map(|pointer| async move { self.fetch_details(&pointer).await })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        batches.into_iter().flatten().collect()
    }

    async fn try_fetch_details(&self, uri: &str) -> Result<Vec<DetailRecord>> {
        let response = self.http.get(uri).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: uri.to_string(),
            });
        }

        let values: Vec<serde_json::Value> = response.json().await?;
        let total = values.len();
        let records: Vec<DetailRecord> = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<DetailRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(uri, error = %e, "skipping malformed detail record");
                    None
                }
            })
            .collect();

        debug!(uri, received = total, parsed = records.len(), "detail batch fetched");
        Ok(records)
    }
}
