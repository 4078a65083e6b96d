//! Configuration and wiring helpers

use audit_ingest::{
    AllowList, Collaborators, Config, Database, MappingTables, NoOpSiteMetadata, RecordStore,
    RunCoordinator, StaticToken,
};
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

pub const TENANT: &str = "contoso-tenant";
pub const DATA_TABLE: &str = "AuditLogData";
pub const ANALYTICS_TABLE: &str = "AuditLogAnalytics";
pub const OPS_PREFIX: &str = "OPS";

/// Run start used by every test: 14:37 UTC, i.e. 01:37 the next day in Sydney (UTC+11)
pub fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 14, 37, 0).unwrap()
}

/// Run id (analytics row key) for [`run_time`]
pub const RUN_ID: &str = "2024_03_11T01_37";

/// Window bounds requested for [`run_time`]
pub const WINDOW_START: &str = "2024-03-10T11:00";
pub const WINDOW_END: &str = "2024-03-10T12:00";

/// Configuration pointing the feed at `api_base` and the store at `db_path`
pub fn test_config(api_base: &str, db_path: &Path) -> Config {
    Config::from_vars([
        ("TenantID", TENANT.to_string()),
        ("AuditLogAuthUrl", "https://manage.office.com".to_string()),
        ("AzureADAppID", "app-id".to_string()),
        ("AzureADAppSecret", "app-secret".to_string()),
        ("StorageConnectionString", db_path.display().to_string()),
        ("AuditLogDataTable", DATA_TABLE.to_string()),
        ("AuditLogAnalyticsTable", ANALYTICS_TABLE.to_string()),
        ("AuditLogDataTablePrefix", "AUDIT".to_string()),
        ("AuditLogOpsTablePrefix", OPS_PREFIX.to_string()),
        ("AuditLogSiteEnrichment", "false".to_string()),
        ("AuditLogApiBaseUrl", api_base.to_string()),
        ("AuditLogMaxConcurrency", "4".to_string()),
    ])
    .unwrap()
}

/// Open the SQLite store configured in `config`
pub async fn open_database(config: &Config) -> Arc<Database> {
    Arc::new(
        Database::new(
            &config.storage.database_path,
            &config.storage.data_table,
            &config.storage.analytics_table,
        )
        .await
        .unwrap(),
    )
}

/// Coordinator over a static token, no site lookups, bundled mappings and `allow_list`
pub fn coordinator(
    config: Config,
    store: Arc<dyn RecordStore>,
    allow_list: AllowList,
) -> RunCoordinator {
    RunCoordinator::new(
        Arc::new(config),
        Collaborators {
            tokens: Arc::new(StaticToken::new("test-token")),
            store,
            sites: Arc::new(NoOpSiteMetadata),
            mappings: Arc::new(MappingTables::bundled().unwrap()),
            allow_list: Arc::new(allow_list),
        },
    )
    .unwrap()
}
