//! Database lifecycle and table creation.

use crate::config::validate_table_name;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Open (or create) the store at `path` and make sure both tables exist
    ///
    /// Table names are interpolated into SQL, so they must be plain identifiers.
    pub async fn new(path: &Path, data_table: &str, analytics_table: &str) -> Result<Self> {
        validate_table_name("AuditLogDataTable", data_table)?;
        validate_table_name("AuditLogAnalyticsTable", analytics_table)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self {
            pool,
            data_table: data_table.to_string(),
            analytics_table: analytics_table.to_string(),
        };

        db.ensure_schema().await?;

        Ok(db)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        Self::create_audit_table(&mut conn, &self.data_table).await?;
        Self::create_analytics_table(&mut conn, &self.analytics_table).await?;

        tracing::debug!(
            data_table = %self.data_table,
            analytics_table = %self.analytics_table,
            "store schema ready"
        );
        Ok(())
    }

    async fn create_audit_table(conn: &mut SqliteConnection, table: &str) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                id TEXT NOT NULL,
                creation_time TEXT NOT NULL,
                operation TEXT NOT NULL,
                workload TEXT,
                object_id TEXT,
                user_type TEXT,
                user_type_name TEXT,
                record_type TEXT,
                record_type_name TEXT,
                user_id TEXT,
                event_source TEXT,
                site_url TEXT,
                site TEXT,
                web_id TEXT,
                web_site_name TEXT,
                list_id TEXT,
                list_name TEXT,
                list_item_unique_id TEXT,
                item_name TEXT,
                item_type TEXT,
                source_file_extension TEXT,
                source_file_name TEXT,
                source_relative_url TEXT,
                user_agent TEXT,
                event_data TEXT,
                target_user_or_group_type TEXT,
                target_user_or_group_name TEXT,
                target_ext_user_name TEXT,
                unique_sharing_id TEXT,
                organization_id TEXT,
                user_key TEXT,
                client_ip TEXT,
                correlation_id TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (partition_key, row_key)
            )
            "#
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {} table: {}",
                table, e
            )))
        })?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_operation ON {table}(operation)"
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {} operation index: {}",
                table, e
            )))
        })?;

        Ok(())
    }

    async fn create_analytics_table(conn: &mut SqliteConnection, table: &str) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                included_operations TEXT NOT NULL DEFAULT '',
                excluded_operations TEXT NOT NULL DEFAULT '',
                included_count INTEGER NOT NULL DEFAULT 0,
                excluded_count INTEGER NOT NULL DEFAULT 0,
                total_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                success INTEGER NOT NULL DEFAULT 0,
                run_date TEXT NOT NULL,
                run_hour TEXT NOT NULL,
                run_frequency TEXT NOT NULL,
                error TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (partition_key, row_key)
            )
            "#
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {} table: {}",
                table, e
            )))
        })?;

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Name of the audit records table
    pub fn data_table(&self) -> &str {
        &self.data_table
    }

    /// Name of the run analytics table
    pub fn analytics_table(&self) -> &str {
        &self.analytics_table
    }
}
