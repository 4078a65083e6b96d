//! Core types for audit-ingest

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use crate::config::ScheduleConfig;
use crate::error::{Error, Result};

/// Sentinel stored when a code has no entry in the static lookup tables
pub const NOT_FOUND: &str = "Not Found";

/// Sentinel stored when the site metadata service cannot resolve a title
pub const NOT_FOUND_OR_ACCESS_DENIED: &str = "Not Found or Access Denied";

/// Format of the run id / analytics row key (local time)
const RUN_ID_FORMAT: &str = "%Y_%m_%dT%H_%M";

/// Format of window bounds in listing queries (UTC, no zone suffix)
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Half-open UTC interval requested from the feed in one run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunWindow {
    /// Local run timestamp `yyyy_MM_ddTHH_mm`; doubles as the analytics row key
    pub run_id: String,
    /// Inclusive window start (UTC, whole hour)
    pub start: DateTime<Utc>,
    /// Exclusive window end (UTC)
    pub end: DateTime<Utc>,
    /// Local run date `yyyy_MM_dd`
    pub run_date: String,
    /// Local run time `HH:mm`
    pub run_hour: String,
}

impl RunWindow {
    /// Derive the window for a run started at `now`
    ///
    /// The window starts `window_offset` before `now`, truncated to the hour, and
    /// spans `window_length`. Run identifiers use the configured time zone.
    pub fn compute(now: DateTime<Utc>, schedule: &ScheduleConfig) -> Result<Self> {
        let zone = local_zone(&schedule.time_zone)?;
        let local_now = now.with_timezone(&zone);

        let back = ChronoDuration::from_std(schedule.window_offset)
            .map_err(|e| Error::config("window_offset", e.to_string()))?;
        let length = ChronoDuration::from_std(schedule.window_length)
            .map_err(|e| Error::config("window_length", e.to_string()))?;

        let start = truncate_to_hour(now - back);
        let end = start + length;

        Ok(Self {
            run_id: local_now.format(RUN_ID_FORMAT).to_string(),
            start,
            end,
            run_date: local_now.format("%Y_%m_%d").to_string(),
            run_hour: local_now.format("%H:%M").to_string(),
        })
    }

    /// Initial listing query (without the leading `?`)
    pub fn listing_query(&self, content_type: &str) -> String {
        format!(
            "contentType={}&startTime={}&endTime={}",
            urlencoding::encode(content_type),
            self.start.format(QUERY_TIME_FORMAT),
            self.end.format(QUERY_TIME_FORMAT)
        )
    }
}

/// Look up an IANA time zone such as `Australia/Sydney`
pub fn local_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| {
        Error::config(
            "AuditLogTimeZone",
            format!("{name:?} is not an IANA time zone"),
        )
    })
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Reference to one retrievable batch of detail records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPointer {
    /// URI of the detail batch
    #[serde(alias = "ContentUri")]
    pub content_uri: String,
    /// Opaque content id
    #[serde(default, alias = "ContentId")]
    pub content_id: String,
    /// Content type (e.g. "Audit.SharePoint")
    #[serde(default, alias = "ContentType")]
    pub content_type: String,
    /// When the content blob was created
    #[serde(default, alias = "ContentCreated")]
    pub content_created: Option<String>,
    /// When the content blob stops being retrievable
    #[serde(default, alias = "ContentExpiration")]
    pub content_expiration: Option<String>,
}

/// One page of the listing feed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Pointers in feed order
    pub pointers: Vec<ContentPointer>,
    /// Value of the `NextPageUri` header; `None` on the last page
    pub continuation: Option<String>,
}

/// A single audit event returned by a detail endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetailRecord {
    /// Globally unique event id (row key)
    pub id: String,
    /// Event time (UTC)
    #[serde(with = "naive_utc")]
    pub creation_time: DateTime<Utc>,
    /// Operation name (e.g. "FileAccessed")
    #[serde(default)]
    pub operation: String,
    /// Workload (e.g. "SharePoint")
    pub workload: Option<String>,
    /// Object acted upon
    pub object_id: Option<String>,
    /// User type code
    #[serde(default, deserialize_with = "code_string")]
    pub user_type: Option<String>,
    /// Record type code
    #[serde(default, deserialize_with = "code_string")]
    pub record_type: Option<String>,
    /// Acting user
    pub user_id: Option<String>,
    /// Event source (e.g. "SharePoint")
    pub event_source: Option<String>,
    /// Site URL
    pub site_url: Option<String>,
    /// Site id
    pub site: Option<String>,
    /// Web id
    pub web_id: Option<String>,
    /// List id
    pub list_id: Option<String>,
    /// List item unique id
    pub list_item_unique_id: Option<String>,
    /// Item name
    pub item_name: Option<String>,
    /// Item type (File, Folder, ...)
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
    /// Organization (tenant) id
    pub organization_id: Option<String>,
    /// User key
    pub user_key: Option<String>,
    /// Client IP address
    #[serde(rename = "ClientIP")]
    pub client_ip: Option<String>,
    /// Correlation id
    pub correlation_id: Option<String>,
}

/// A detail record plus display names derived during enrichment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichedRecord {
    /// The record as received
    pub record: DetailRecord,
    /// Display name for `user_type`
    pub user_type_name: Option<String>,
    /// Display name for `record_type`
    pub record_type_name: Option<String>,
    /// Title of the web the event happened in
    pub web_site_name: Option<String>,
    /// Title of the list the event happened in
    pub list_name: Option<String>,
}

impl EnrichedRecord {
    /// Wrap a record without any derived names
    pub fn bare(record: DetailRecord) -> Self {
        Self {
            record,
            user_type_name: None,
            record_type_name: None,
            web_site_name: None,
            list_name: None,
        }
    }
}

/// Outcome of a run as persisted in the analytics table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run began; final status not yet recorded
    Started,
    /// Every page was drained and every accepted record written
    Completed,
    /// The run stopped early
    Failed,
}

impl RunStatus {
    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "Started",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
        }
    }

    /// Parse the stored string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Started" => Some(RunStatus::Started),
            "Completed" => Some(RunStatus::Completed),
            "Failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run summary, written when the run starts and again when it ends
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAnalytics {
    /// Configured ops prefix
    pub partition_key: String,
    /// Run id
    pub row_key: String,
    /// Requested window start
    pub window_start: DateTime<Utc>,
    /// Requested window end
    pub window_end: DateTime<Utc>,
    /// Distinct operations that were stored
    pub included_operations: BTreeSet<String>,
    /// Distinct operations that were filtered out
    pub excluded_operations: BTreeSet<String>,
    /// Records stored
    pub included_count: u64,
    /// Records filtered out
    pub excluded_count: u64,
    /// Records processed
    pub total_count: u64,
    /// Run status
    pub status: RunStatus,
    /// True only for a completed run
    pub success: bool,
    /// Local run date
    pub run_date: String,
    /// Local run time
    pub run_hour: String,
    /// Cadence label
    pub run_frequency: String,
    /// Fatal error that ended the run
    pub error: Option<String>,
}

impl RunAnalytics {
    /// Initial analytics for a run that is about to start
    pub fn started(window: &RunWindow, ops_prefix: &str) -> Self {
        Self {
            partition_key: ops_prefix.to_string(),
            row_key: window.run_id.clone(),
            window_start: window.start,
            window_end: window.end,
            included_operations: BTreeSet::new(),
            excluded_operations: BTreeSet::new(),
            included_count: 0,
            excluded_count: 0,
            total_count: 0,
            status: RunStatus::Started,
            success: false,
            run_date: window.run_date.clone(),
            run_hour: window.run_hour.clone(),
            run_frequency: "Current".to_string(),
            error: None,
        }
    }

    /// Mark the run completed
    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.success = true;
        self.error = None;
    }

    /// Mark the run failed with the given error
    pub fn fail(&mut self, error: &Error) {
        self.status = RunStatus::Failed;
        self.success = false;
        self.error = Some(error.to_string());
    }
}

/// Accept codes that arrive either as JSON numbers or strings
fn code_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// Event timestamps arrive without a zone suffix and are UTC
mod naive_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn window_starts_three_hours_back_truncated_to_hour() {
        let schedule = ScheduleConfig::default();
        let window = RunWindow::compute(utc(2024, 3, 10, 14, 37), &schedule).unwrap();

        assert_eq!(window.start, utc(2024, 3, 10, 11, 0));
        assert_eq!(window.end, utc(2024, 3, 10, 12, 0));
    }

    #[test]
    fn run_id_uses_local_time_zone() {
        let schedule = ScheduleConfig::default();
        // Sydney is on daylight time (UTC+11) in March
        let window = RunWindow::compute(utc(2024, 3, 10, 14, 37), &schedule).unwrap();

        assert_eq!(window.run_id, "2024_03_11T01_37");
        assert_eq!(window.run_date, "2024_03_11");
        assert_eq!(window.run_hour, "01:37");
    }

    #[test]
    fn run_id_follows_daylight_saving() {
        let schedule = ScheduleConfig::default();
        // UTC+10 in July
        let window = RunWindow::compute(utc(2024, 7, 10, 14, 37), &schedule).unwrap();
        assert_eq!(window.run_id, "2024_07_11T00_37");

        let schedule = ScheduleConfig {
            time_zone: "UTC".to_string(),
            ..Default::default()
        };
        let window = RunWindow::compute(utc(2024, 7, 10, 14, 37), &schedule).unwrap();
        assert_eq!(window.run_id, "2024_07_10T14_37");
    }

    #[test]
    fn window_crosses_midnight() {
        let schedule = ScheduleConfig {
            time_zone: "UTC".to_string(),
            window_offset: Duration::from_secs(3 * 3600),
            window_length: Duration::from_secs(3600),
            ..Default::default()
        };
        let window = RunWindow::compute(utc(2024, 1, 1, 1, 5), &schedule).unwrap();
        assert_eq!(window.start, utc(2023, 12, 31, 22, 0));
        assert_eq!(window.end, utc(2023, 12, 31, 23, 0));
    }

    #[test]
    fn listing_query_formats_bounds_without_zone() {
        let window = RunWindow::compute(utc(2024, 3, 10, 14, 37), &ScheduleConfig::default())
            .unwrap();
        assert_eq!(
            window.listing_query("Audit.SharePoint"),
            "contentType=Audit.SharePoint&startTime=2024-03-10T11:00&endTime=2024-03-10T12:00"
        );
    }

    #[test]
    fn unknown_zone_is_config_error() {
        assert!(matches!(local_zone("UTC+10"), Err(Error::Config { .. })));
        assert!(local_zone("America/New_York").is_ok());
    }

    #[test]
    fn content_pointer_accepts_both_key_casings() {
        let camel: ContentPointer = serde_json::from_str(
            r#"{"contentUri":"https://x/1","contentId":"1","contentType":"Audit.SharePoint",
                "contentCreated":"2024-01-01T00:00:00.000Z","contentExpiration":"2024-01-08T00:00:00.000Z"}"#,
        )
        .unwrap();
        let pascal: ContentPointer = serde_json::from_str(
            r#"{"ContentUri":"https://x/1","ContentId":"1","ContentType":"Audit.SharePoint",
                "ContentCreated":"2024-01-01T00:00:00.000Z","ContentExpiration":"2024-01-08T00:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(camel, pascal);
        assert_eq!(camel.content_uri, "https://x/1");
    }

    #[test]
    fn detail_record_parses_numeric_codes_and_naive_time() {
        let record: DetailRecord = serde_json::from_str(
            r#"{
                "Id": "5c1c0a2b-0000-4000-8000-000000000001",
                "CreationTime": "2024-03-10T11:15:42",
                "Operation": "FileAccessed",
                "Workload": "SharePoint",
                "UserType": 0,
                "RecordType": "6",
                "ClientIP": "10.0.0.1",
                "SiteUrl": "https://contoso.sharepoint.com/sites/hr/",
                "SomethingNew": {"nested": true}
            }"#,
        )
        .unwrap();

        assert_eq!(
            record.creation_time,
            Utc.with_ymd_and_hms(2024, 3, 10, 11, 15, 42).unwrap()
        );
        assert_eq!(record.user_type.as_deref(), Some("0"));
        assert_eq!(record.record_type.as_deref(), Some("6"));
        assert_eq!(record.client_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.list_id, None);
    }

    #[test]
    fn detail_record_accepts_zoned_time() {
        let record: DetailRecord = serde_json::from_str(
            r#"{"Id":"a","CreationTime":"2024-03-10T21:15:42+10:00","Operation":"FileDeleted"}"#,
        )
        .unwrap();
        assert_eq!(
            record.creation_time,
            Utc.with_ymd_and_hms(2024, 3, 10, 11, 15, 42).unwrap()
        );
    }

    #[test]
    fn detail_record_without_id_is_rejected() {
        let result =
            serde_json::from_str::<DetailRecord>(r#"{"CreationTime":"2024-03-10T11:15:42"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn run_status_string_forms() {
        for status in [RunStatus::Started, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("started"), None);
    }

    #[test]
    fn analytics_lifecycle() {
        let window = RunWindow::compute(utc(2024, 3, 10, 14, 37), &ScheduleConfig::default())
            .unwrap();
        let mut analytics = RunAnalytics::started(&window, "OPS");
        assert_eq!(analytics.status, RunStatus::Started);
        assert!(!analytics.success);
        assert_eq!(analytics.row_key, window.run_id);

        analytics.fail(&Error::Other("boom".into()));
        assert_eq!(analytics.status, RunStatus::Failed);
        assert_eq!(analytics.error.as_deref(), Some("boom"));

        analytics.complete();
        assert!(analytics.success);
        assert_eq!(analytics.error, None);
    }
}
