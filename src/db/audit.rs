//! Audit record upserts and lookups.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{AuditRow, Database};

// Columns in bind order; partition_key and row_key form the key
const AUDIT_COLUMNS: [&str; 35] = [
    "partition_key",
    "row_key",
    "id",
    "creation_time",
    "operation",
    "workload",
    "object_id",
    "user_type",
    "user_type_name",
    "record_type",
    "record_type_name",
    "user_id",
    "event_source",
    "site_url",
    "site",
    "web_id",
    "web_site_name",
    "list_id",
    "list_name",
    "list_item_unique_id",
    "item_name",
    "item_type",
    "source_file_extension",
    "source_file_name",
    "source_relative_url",
    "user_agent",
    "event_data",
    "target_user_or_group_type",
    "target_user_or_group_name",
    "target_ext_user_name",
    "unique_sharing_id",
    "organization_id",
    "user_key",
    "client_ip",
    "correlation_id",
];

// Always overwritten on merge; the remaining columns keep their stored value when
// the new row has none
const REQUIRED_COLUMNS: [&str; 3] = ["id", "creation_time", "operation"];

fn upsert_sql(table: &str) -> String {
    let columns = AUDIT_COLUMNS.join(", ");
    let placeholders = vec!["?"; AUDIT_COLUMNS.len()].join(", ");
    let updates: Vec<String> = AUDIT_COLUMNS[2..]
        .iter()
        .map(|col| {
            if REQUIRED_COLUMNS.contains(col) {
                format!("{col} = excluded.{col}")
            } else {
                format!("{col} = COALESCE(excluded.{col}, {col})")
            }
        })
        .collect();

    format!(
        "INSERT INTO {table} ({columns}, updated_at) VALUES ({placeholders}, ?)
         ON CONFLICT(partition_key, row_key) DO UPDATE SET {}, updated_at = excluded.updated_at",
        updates.join(", ")
    )
}

impl Database {
    /// Insert an audit row, or merge it into the existing row with the same key
    ///
    /// Columns present in `row` overwrite the stored values; absent optional
    /// columns leave the stored values untouched.
    pub async fn upsert_audit_row(&self, row: &AuditRow) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let sql = upsert_sql(&self.data_table);

        sqlx::query(&sql)
            .bind(&row.partition_key)
            .bind(&row.row_key)
            .bind(&row.id)
            .bind(&row.creation_time)
            .bind(&row.operation)
            .bind(&row.workload)
            .bind(&row.object_id)
            .bind(&row.user_type)
            .bind(&row.user_type_name)
            .bind(&row.record_type)
            .bind(&row.record_type_name)
            .bind(&row.user_id)
            .bind(&row.event_source)
            .bind(&row.site_url)
            .bind(&row.site)
            .bind(&row.web_id)
            .bind(&row.web_site_name)
            .bind(&row.list_id)
            .bind(&row.list_name)
            .bind(&row.list_item_unique_id)
            .bind(&row.item_name)
            .bind(&row.item_type)
            .bind(&row.source_file_extension)
            .bind(&row.source_file_name)
            .bind(&row.source_relative_url)
            .bind(&row.user_agent)
            .bind(&row.event_data)
            .bind(&row.target_user_or_group_type)
            .bind(&row.target_user_or_group_name)
            .bind(&row.target_ext_user_name)
            .bind(&row.unique_sharing_id)
            .bind(&row.organization_id)
            .bind(&row.user_key)
            .bind(&row.client_ip)
            .bind(&row.correlation_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to upsert audit row {}/{}: {}",
                    row.partition_key, row.row_key, e
                )))
            })?;

        Ok(())
    }

    /// Fetch one audit row by key
    pub async fn get_audit_row(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<AuditRow>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE partition_key = ? AND row_key = ?",
            AUDIT_COLUMNS.join(", "),
            self.data_table
        );
        let row = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(partition_key)
            .bind(row_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get audit row: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// Audit rows in one partition, ordered by row key
    pub async fn list_audit_rows(&self, partition_key: &str) -> Result<Vec<AuditRow>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE partition_key = ? ORDER BY row_key",
            AUDIT_COLUMNS.join(", "),
            self.data_table
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(partition_key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list audit rows: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// Total number of stored audit rows
    pub async fn count_audit_rows(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.data_table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count audit rows: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
