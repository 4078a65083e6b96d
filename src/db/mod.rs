//! Keyed store for audit-ingest
//!
//! SQLite persistence for audit records and per-run analytics. Both tables are keyed
//! by `(partition_key, row_key)` and written with insert-or-merge semantics, so
//! re-ingesting a record overwrites it instead of duplicating it.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `schema`: Database lifecycle, table creation
//! - `audit`: Audit record upserts and lookups
//! - `analytics`: Run analytics upserts and lookups

use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::Result;
use crate::types::{EnrichedRecord, RunAnalytics};

mod analytics;
mod audit;
mod schema;

/// Persisted shape of an audit record
///
/// Built from an [`EnrichedRecord`] by [`AuditRow::from_enriched`]; every column is
/// assigned explicitly.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AuditRow {
    /// `{prefix}_{yyyy_MM_dd}` in the configured time zone
    pub partition_key: String,
    /// Record id
    pub row_key: String,
    /// Record id
    pub id: String,
    /// Event time, RFC 3339 in the configured time zone
    pub creation_time: String,
    /// Operation name
    pub operation: String,
    /// Workload
    pub workload: Option<String>,
    /// Object acted upon
    pub object_id: Option<String>,
    /// User type code
    pub user_type: Option<String>,
    /// User type display name
    pub user_type_name: Option<String>,
    /// Record type code
    pub record_type: Option<String>,
    /// Record type display name
    pub record_type_name: Option<String>,
    /// Acting user
    pub user_id: Option<String>,
    /// Event source
    pub event_source: Option<String>,
    /// Site URL
    pub site_url: Option<String>,
    /// Site id
    pub site: Option<String>,
    /// Web id
    pub web_id: Option<String>,
    /// Web title
    pub web_site_name: Option<String>,
    /// List id
    pub list_id: Option<String>,
    /// List title
    pub list_name: Option<String>,
    /// List item unique id
    pub list_item_unique_id: Option<String>,
    /// Item name
    pub item_name: Option<String>,
    /// Item type
    pub item_type: Option<String>,
    /// Source file extension
    pub source_file_extension: Option<String>,
    /// Source file name
    pub source_file_name: Option<String>,
    /// Source relative URL
    pub source_relative_url: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// Additional event data
    pub event_data: Option<String>,
    /// Sharing target type
    pub target_user_or_group_type: Option<String>,
    /// Sharing target name
    pub target_user_or_group_name: Option<String>,
    /// External sharing target
    pub target_ext_user_name: Option<String>,
    /// Sharing id
    pub unique_sharing_id: Option<String>,
    /// Organization id
    pub organization_id: Option<String>,
    /// User key
    pub user_key: Option<String>,
    /// Client IP address
    pub client_ip: Option<String>,
    /// Correlation id
    pub correlation_id: Option<String>,
}

impl AuditRow {
    /// Map an enriched record onto its stored row
    ///
    /// `creation_time` is the event time already rendered in the local time zone.
    pub fn from_enriched(
        enriched: &EnrichedRecord,
        partition_key: String,
        creation_time: String,
    ) -> Self {
        let r = &enriched.record;
        Self {
            partition_key,
            row_key: r.id.clone(),
            id: r.id.clone(),
            creation_time,
            operation: r.operation.clone(),
            workload: r.workload.clone(),
            object_id: r.object_id.clone(),
            user_type: r.user_type.clone(),
            user_type_name: enriched.user_type_name.clone(),
            record_type: r.record_type.clone(),
            record_type_name: enriched.record_type_name.clone(),
            user_id: r.user_id.clone(),
            event_source: r.event_source.clone(),
            site_url: r.site_url.clone(),
            site: r.site.clone(),
            web_id: r.web_id.clone(),
            web_site_name: enriched.web_site_name.clone(),
            list_id: r.list_id.clone(),
            list_name: enriched.list_name.clone(),
            list_item_unique_id: r.list_item_unique_id.clone(),
            item_name: r.item_name.clone(),
            item_type: r.item_type.clone(),
            source_file_extension: r.source_file_extension.clone(),
            source_file_name: r.source_file_name.clone(),
            source_relative_url: r.source_relative_url.clone(),
            user_agent: r.user_agent.clone(),
            event_data: r.event_data.clone(),
            target_user_or_group_type: r.target_user_or_group_type.clone(),
            target_user_or_group_name: r.target_user_or_group_name.clone(),
            target_ext_user_name: r.target_ext_user_name.clone(),
            unique_sharing_id: r.unique_sharing_id.clone(),
            organization_id: r.organization_id.clone(),
            user_key: r.user_key.clone(),
            client_ip: r.client_ip.clone(),
            correlation_id: r.correlation_id.clone(),
        }
    }
}

/// Stored run analytics row
#[derive(Debug, Clone, FromRow)]
pub struct AnalyticsRow {
    /// Ops prefix
    pub partition_key: String,
    /// Run id
    pub row_key: String,
    /// Window start, RFC 3339 UTC
    pub window_start: String,
    /// Window end, RFC 3339 UTC
    pub window_end: String,
    /// Comma-separated included operation names
    pub included_operations: String,
    /// Comma-separated excluded operation names
    pub excluded_operations: String,
    /// Records stored
    pub included_count: i64,
    /// Records filtered out
    pub excluded_count: i64,
    /// Records processed
    pub total_count: i64,
    /// Run status
    pub status: String,
    /// Run succeeded
    pub success: bool,
    /// Local run date
    pub run_date: String,
    /// Local run time
    pub run_hour: String,
    /// Cadence label
    pub run_frequency: String,
    /// Fatal error message
    pub error: Option<String>,
}

/// Destination for audit rows and run analytics
///
/// [`Database`] is the production implementation; tests substitute failing or
/// recording stores.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or merge one audit row
    async fn upsert_audit_row(&self, row: &AuditRow) -> Result<()>;

    /// Insert or replace the analytics row for a run
    async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()>;
}

#[async_trait]
impl RecordStore for Database {
    async fn upsert_audit_row(&self, row: &AuditRow) -> Result<()> {
        Database::upsert_audit_row(self, row).await
    }

    async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()> {
        Database::upsert_run_analytics(self, analytics).await
    }
}

/// Database handle for audit-ingest
pub struct Database {
    pool: SqlitePool,
    data_table: String,
    analytics_table: String,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
