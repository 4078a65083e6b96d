//! Run analytics recording.

use std::sync::Arc;
use tracing::{error, info};

use crate::classify::Classification;
use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::types::RunAnalytics;

/// Persists the per-run summary row
#[derive(Clone)]
pub struct AnalyticsRecorder {
    store: Arc<dyn RecordStore>,
    table: String,
}

impl AnalyticsRecorder {
    /// Create a recorder writing to `table`
    pub fn new(store: Arc<dyn RecordStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Insert or replace the row for this run
    pub async fn record(&self, analytics: &RunAnalytics) -> Result<()> {
        info!(
            run_id = %analytics.row_key,
            status = %analytics.status,
            total = analytics.total_count,
            included = analytics.included_count,
            excluded = analytics.excluded_count,
            "recording run analytics"
        );

        self.store
            .upsert_run_analytics(analytics)
            .await
            .map_err(|e| {
                error!(run_id = %analytics.row_key, error = %e, "analytics write failed");
                Error::StoreWrite {
                    table: self.table.clone(),
                    key: format!("{}/{}", analytics.partition_key, analytics.row_key),
                    reason: e.to_string(),
                }
            })
    }
}

impl RunAnalytics {
    /// Copy counts and operation names from a classification
    pub fn record_classification(&mut self, classification: &Classification) {
        self.included_count = classification.included.len() as u64;
        self.excluded_count = classification.excluded.len() as u64;
        self.total_count = classification.total() as u64;
        self.included_operations = classification.included_operations.to_set();
        self.excluded_operations = classification.excluded_operations.to_set();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{AllowList, classify};
    use crate::config::ScheduleConfig;
    use crate::db::AuditRow;
    use crate::types::{DetailRecord, EnrichedRecord, RunWindow};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn upsert_audit_row(&self, _row: &AuditRow) -> Result<()> {
            Ok(())
        }

        async fn upsert_run_analytics(&self, _analytics: &RunAnalytics) -> Result<()> {
            Err(Error::Other("502 Bad Gateway".into()))
        }
    }

    fn analytics() -> RunAnalytics {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 14, 37, 0).unwrap();
        let window = RunWindow::compute(now, &ScheduleConfig::default()).unwrap();
        RunAnalytics::started(&window, "OPS")
    }

    #[test]
    fn counts_follow_classification() {
        let records: Vec<EnrichedRecord> = ["FileAccessed", "PageViewed", "fileaccessed"]
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let d: DetailRecord = serde_json::from_value(serde_json::json!({
                    "Id": i.to_string(),
                    "CreationTime": "2024-03-10T11:00:00",
                    "Operation": op
                }))
                .unwrap();
                EnrichedRecord::bare(d)
            })
            .collect();
        let c = classify(records, &AllowList::new(["FileAccessed"]));

        let mut a = analytics();
        a.record_classification(&c);

        assert_eq!(a.total_count, 3);
        assert_eq!(a.included_count, 2);
        assert_eq!(a.excluded_count, 1);
        assert_eq!(a.included_count + a.excluded_count, a.total_count);
        assert!(a.included_operations.contains("FileAccessed"));
        assert!(a.excluded_operations.contains("PageViewed"));
    }

    #[tokio::test]
    async fn write_failure_is_store_write_error() {
        let recorder = AnalyticsRecorder::new(Arc::new(BrokenStore), "AuditLogAnalytics");
        let err = recorder.record(&analytics()).await.unwrap_err();
        assert!(matches!(err, Error::StoreWrite { ref table, .. } if table == "AuditLogAnalytics"));
    }
}
