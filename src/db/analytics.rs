//! Run analytics upserts and lookups.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::error::DatabaseError;
use crate::types::{RunAnalytics, RunStatus};
use crate::{Error, Result};

use super::{AnalyticsRow, Database};

impl Database {
    /// Insert or replace the analytics row for a run
    ///
    /// Every column is overwritten, so the final write of a run supersedes its
    /// `Started` row.
    pub async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            r#"
            INSERT INTO {} (
                partition_key, row_key, window_start, window_end,
                included_operations, excluded_operations,
                included_count, excluded_count, total_count,
                status, success, run_date, run_hour, run_frequency, error, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(partition_key, row_key) DO UPDATE SET
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                included_operations = excluded.included_operations,
                excluded_operations = excluded.excluded_operations,
                included_count = excluded.included_count,
                excluded_count = excluded.excluded_count,
                total_count = excluded.total_count,
                status = excluded.status,
                success = excluded.success,
                run_date = excluded.run_date,
                run_hour = excluded.run_hour,
                run_frequency = excluded.run_frequency,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
            self.analytics_table
        );

        sqlx::query(&sql)
            .bind(&analytics.partition_key)
            .bind(&analytics.row_key)
            .bind(analytics.window_start.to_rfc3339())
            .bind(analytics.window_end.to_rfc3339())
            .bind(join_operations(&analytics.included_operations))
            .bind(join_operations(&analytics.excluded_operations))
            .bind(analytics.included_count as i64)
            .bind(analytics.excluded_count as i64)
            .bind(analytics.total_count as i64)
            .bind(analytics.status.as_str())
            .bind(analytics.success)
            .bind(&analytics.run_date)
            .bind(&analytics.run_hour)
            .bind(&analytics.run_frequency)
            .bind(&analytics.error)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to upsert run analytics {}/{}: {}",
                    analytics.partition_key, analytics.row_key, e
                )))
            })?;

        Ok(())
    }

    /// Fetch the analytics for one run
    pub async fn get_run_analytics(
        &self,
        partition_key: &str,
        run_id: &str,
    ) -> Result<Option<RunAnalytics>> {
        let sql = format!(
            r#"
            SELECT partition_key, row_key, window_start, window_end,
                   included_operations, excluded_operations,
                   included_count, excluded_count, total_count,
                   status, success, run_date, run_hour, run_frequency, error
            FROM {}
            WHERE partition_key = ? AND row_key = ?
            "#,
            self.analytics_table
        );
        let row = sqlx::query_as::<_, AnalyticsRow>(&sql)
            .bind(partition_key)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get run analytics: {}",
                    e
                )))
            })?;

        row.map(RunAnalytics::try_from).transpose()
    }
}

impl TryFrom<AnalyticsRow> for RunAnalytics {
    type Error = Error;

    fn try_from(row: AnalyticsRow) -> Result<Self> {
        let status = RunStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "unknown run status {:?}",
                row.status
            )))
        })?;

        Ok(Self {
            partition_key: row.partition_key,
            row_key: row.row_key,
            window_start: parse_time(&row.window_start)?,
            window_end: parse_time(&row.window_end)?,
            included_operations: split_operations(&row.included_operations),
            excluded_operations: split_operations(&row.excluded_operations),
            included_count: row.included_count.max(0) as u64,
            excluded_count: row.excluded_count.max(0) as u64,
            total_count: row.total_count.max(0) as u64,
            status,
            success: row.success,
            run_date: row.run_date,
            run_hour: row.run_hour,
            run_frequency: row.run_frequency,
            error: row.error,
        })
    }
}

fn join_operations(operations: &BTreeSet<String>) -> String {
    operations.iter().cloned().collect::<Vec<_>>().join(",")
}

fn split_operations(joined: &str) -> BTreeSet<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "invalid timestamp {:?}: {}",
                value, e
            )))
        })
}
