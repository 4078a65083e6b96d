
use crate::db::*;
use crate::types::{DetailRecord, EnrichedRecord};
use tempfile::NamedTempFile;

pub(super) async fn open_db(temp_file: &NamedTempFile) -> Database {
    Database::new(temp_file.path(), "AuditLogData", "AuditLogAnalytics")
        .await
        .unwrap()
}

pub(super) fn enriched(id: &str, operation: &str) -> EnrichedRecord {
    let record: DetailRecord = serde_json::from_value(serde_json::json!({
        "Id": id,
        "CreationTime": "2024-03-10T11:15:42",
        "Operation": operation,
        "Workload": "SharePoint",
        "UserId": "jane@contoso.com",
        "ClientIP": "10.0.0.1"
    }))
    .unwrap();
    EnrichedRecord::bare(record)
}

pub(super) fn row(id: &str, operation: &str) -> AuditRow {
    AuditRow::from_enriched(
        &enriched(id, operation),
        "AUDIT_2024_03_10".to_string(),
        "2024-03-10T21:15:42+10:00".to_string(),
    )
}
