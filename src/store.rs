//! Store writer
//!
//! Derives the storage key of each accepted record and upserts it. Any failure is
//! escalated as [`Error::StoreWrite`] and ends the run.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::StorageConfig;
use crate::db::{AuditRow, RecordStore};
use crate::error::{Error, Result};
use crate::types::EnrichedRecord;

/// Writes accepted records to the audit table
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn RecordStore>,
    table: String,
    prefix: String,
    zone: Tz,
}

impl StoreWriter {
    /// Create a writer for the configured audit table
    pub fn new(store: Arc<dyn RecordStore>, storage: &StorageConfig, zone: Tz) -> Self {
        Self {
            store,
            table: storage.data_table.clone(),
            prefix: storage.data_partition_prefix.clone(),
            zone,
        }
    }

    /// `{prefix}_{yyyy_MM_dd}` of the event's local date
    pub fn partition_key(&self, creation_time: DateTime<Utc>) -> String {
        format!(
            "{}_{}",
            self.prefix,
            creation_time.with_timezone(&self.zone).format("%Y_%m_%d")
        )
    }

    /// Stored row for a record
    ///
    /// The event time keeps the numeric offset in force at that instant.
    pub fn row_for(&self, enriched: &EnrichedRecord) -> AuditRow {
        let created = enriched.record.creation_time;
        AuditRow::from_enriched(
            enriched,
            self.partition_key(created),
            created.with_timezone(&self.zone).fixed_offset().to_rfc3339(),
        )
    }

    /// Insert or merge one record
    pub async fn upsert(&self, enriched: &EnrichedRecord) -> Result<()> {
        let row = self.row_for(enriched);
        debug!(
            operation = %row.operation,
            partition_key = %row.partition_key,
            row_key = %row.row_key,
            "writing audit record"
        );

        self.store.upsert_audit_row(&row).await.map_err(|e| {
            error!(
                table = %self.table,
                row_key = %row.row_key,
                error = %e,
                "audit record write failed"
            );
            Error::StoreWrite {
                table: self.table.clone(),
                key: format!("{}/{}", row.partition_key, row.row_key),
                reason: e.to_string(),
            }
        })
    }

    /// Write records in order, stopping at the first failure
    ///
    /// Returns the number of records written.
    pub async fn write_all(&self, records: &[EnrichedRecord]) -> Result<usize> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(records.len())
    }
}
