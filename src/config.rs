//! Configuration types for audit-ingest
//!
//! The configuration is built once at process start, validated, and then shared
//! immutably (behind an `Arc`) with every pipeline component.

use crate::error::{Error, Result};
use crate::types::local_zone;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Tenant identity and application credentials used to obtain access tokens
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Directory tenant id (`TenantID`)
    #[serde(default)]
    pub tenant_id: String,

    /// Resource the feed token is requested for (`AuditLogAuthUrl`)
    #[serde(default)]
    pub auth_resource: String,

    /// Application (client) id (`AzureADAppID`)
    #[serde(default)]
    pub client_id: String,

    /// Application secret (`AzureADAppSecret`)
    #[serde(default)]
    pub client_secret: String,

    /// Identity provider base URL (default: "https://login.windows.net")
    #[serde(default = "default_login_base_url")]
    pub login_base_url: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            auth_resource: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            login_base_url: default_login_base_url(),
        }
    }
}

/// What to do when a listing page request returns a non-success status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingFailurePolicy {
    /// Mark the run failed; pagination was not drained (default)
    #[default]
    FailRun,
    /// Log and treat the failed page as the end of the feed
    EndOfFeed,
}

/// Activity feed endpoint and fetch behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Management API base URL (default: "https://manage.office.com")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Content type requested from the feed (default: "Audit.SharePoint")
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Maximum in-flight detail fetches and enrichment lookups (default: 200)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Listing failure handling
    #[serde(default)]
    pub listing_failure_policy: ListingFailurePolicy,

    /// Retry policy for detail fetches
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            content_type: default_content_type(),
            max_concurrency: default_max_concurrency(),
            request_timeout: default_request_timeout(),
            listing_failure_policy: ListingFailurePolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Keyed store location, table names, and partition-key prefixes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file (`StorageConnectionString`)
    #[serde(default)]
    pub database_path: PathBuf,

    /// Audit records table (`AuditLogDataTable`)
    #[serde(default)]
    pub data_table: String,

    /// Run analytics table (`AuditLogAnalyticsTable`)
    #[serde(default)]
    pub analytics_table: String,

    /// Partition-key prefix for audit records (`AuditLogDataTablePrefix`)
    #[serde(default)]
    pub data_partition_prefix: String,

    /// Partition key for run analytics (`AuditLogOpsTablePrefix`)
    #[serde(default)]
    pub ops_partition_prefix: String,
}

/// Record enrichment settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Resolve site and list titles through the site metadata service (default: true)
    #[serde(default = "default_true")]
    pub site_metadata: bool,

    /// Admin user for the site metadata service (`SPUserName`)
    #[serde(default)]
    pub site_user: String,

    /// Admin password for the site metadata service (`SPUserPassword`)
    #[serde(default)]
    pub site_password: String,

    /// Replacement for the bundled operation allow-list (JSON array of strings)
    #[serde(default)]
    pub operations_file: Option<PathBuf>,

    /// Replacement for the bundled code-to-name tables
    #[serde(default)]
    pub mappings_file: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            site_metadata: true,
            site_user: String::new(),
            site_password: String::new(),
            operations_file: None,
            mappings_file: None,
        }
    }
}

/// Run window and cadence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA name of the tenant's local time zone (default: "Australia/Sydney")
    ///
    /// Run ids, partition dates and stored event times are rendered in this zone,
    /// daylight saving included.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// How far behind "now" the window starts (default: 3 hours)
    #[serde(default = "default_window_offset", with = "duration_serde")]
    pub window_offset: Duration,

    /// Length of the requested window (default: 1 hour)
    #[serde(default = "default_window_length", with = "duration_serde")]
    pub window_length: Duration,

    /// Interval between scheduled runs (default: 1 hour)
    #[serde(default = "default_run_interval", with = "duration_serde")]
    pub run_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            window_offset: default_window_offset(),
            window_length: default_window_length(),
            run_interval: default_run_interval(),
        }
    }
}

/// Main configuration for the ingestion service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tenant identity and app credentials
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Activity feed settings
    #[serde(default)]
    pub feed: FeedConfig,

    /// Keyed store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Enrichment settings
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Run window and cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Retry configuration for detail fetches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 4, so 5 attempts in total)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 0, immediate re-attempt)
    #[serde(default, with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: Duration::ZERO,
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl Config {
    /// Build a configuration from environment-style key/value pairs and validate it
    ///
    /// Unknown keys are ignored. Numeric tuning keys that fail to parse are
    /// reported as configuration errors rather than silently defaulted.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut config = Config {
            tenant: TenantConfig {
                tenant_id: get("TenantID"),
                auth_resource: get("AuditLogAuthUrl"),
                client_id: get("AzureADAppID"),
                client_secret: get("AzureADAppSecret"),
                login_base_url: default_login_base_url(),
            },
            storage: StorageConfig {
                database_path: PathBuf::from(get("StorageConnectionString")),
                data_table: get("AuditLogDataTable"),
                analytics_table: get("AuditLogAnalyticsTable"),
                data_partition_prefix: get("AuditLogDataTablePrefix"),
                ops_partition_prefix: get("AuditLogOpsTablePrefix"),
            },
            enrichment: EnrichmentConfig {
                site_user: get("SPUserName"),
                site_password: get("SPUserPassword"),
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(v) = non_empty(&vars, "AuditLogLoginBaseUrl") {
            config.tenant.login_base_url = v;
        }
        if let Some(v) = non_empty(&vars, "AuditLogApiBaseUrl") {
            config.feed.api_base_url = v;
        }
        if let Some(v) = non_empty(&vars, "AuditLogContentType") {
            config.feed.content_type = v;
        }
        if let Some(v) = non_empty(&vars, "AuditLogTimeZone") {
            config.schedule.time_zone = v;
        }
        if let Some(v) = non_empty(&vars, "AuditLogMaxConcurrency") {
            config.feed.max_concurrency = parse_key("AuditLogMaxConcurrency", &v)?;
        }
        if let Some(v) = non_empty(&vars, "AuditLogSiteEnrichment") {
            config.enrichment.site_metadata = parse_key("AuditLogSiteEnrichment", &v)?;
        }
        if let Some(v) = non_empty(&vars, "AuditLogOperationsFile") {
            config.enrichment.operations_file = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(&vars, "AuditLogMappingsFile") {
            config.enrichment.mappings_file = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Check that every required setting is present and every tuning value is usable
    pub fn validate(&self) -> Result<()> {
        let mut required: Vec<(&str, bool)> = vec![
            ("TenantID", self.tenant.tenant_id.is_empty()),
            ("AuditLogAuthUrl", self.tenant.auth_resource.is_empty()),
            ("AzureADAppID", self.tenant.client_id.is_empty()),
            ("AzureADAppSecret", self.tenant.client_secret.is_empty()),
            (
                "StorageConnectionString",
                self.storage.database_path.as_os_str().is_empty(),
            ),
            ("AuditLogDataTable", self.storage.data_table.is_empty()),
            (
                "AuditLogAnalyticsTable",
                self.storage.analytics_table.is_empty(),
            ),
            (
                "AuditLogDataTablePrefix",
                self.storage.data_partition_prefix.is_empty(),
            ),
            (
                "AuditLogOpsTablePrefix",
                self.storage.ops_partition_prefix.is_empty(),
            ),
        ];
        if self.enrichment.site_metadata {
            required.push(("SPUserName", self.enrichment.site_user.is_empty()));
            required.push(("SPUserPassword", self.enrichment.site_password.is_empty()));
        }

        if let Some((key, _)) = required.into_iter().find(|(_, missing)| *missing) {
            return Err(Error::config(key, format!("{key} is not set")));
        }

        validate_table_name("AuditLogDataTable", &self.storage.data_table)?;
        validate_table_name("AuditLogAnalyticsTable", &self.storage.analytics_table)?;
        if self
            .storage
            .data_table
            .eq_ignore_ascii_case(&self.storage.analytics_table)
        {
            return Err(Error::config(
                "AuditLogAnalyticsTable",
                "audit and analytics tables must differ",
            ));
        }

        if self.feed.max_concurrency == 0 {
            return Err(Error::config("AuditLogMaxConcurrency", "concurrency must be at least 1"));
        }
        local_zone(&self.schedule.time_zone)?;
        if self.schedule.window_length.is_zero() {
            return Err(Error::config("window_length", "window must not be empty"));
        }

        Ok(())
    }

    /// Listing endpoint for this tenant
    pub fn listing_url(&self) -> String {
        format!(
            "{}/api/v1.0/{}/activity/feed/subscriptions/content",
            self.feed.api_base_url.trim_end_matches('/'),
            self.tenant.tenant_id
        )
    }

    /// Token endpoint for this tenant
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/token",
            self.tenant.login_base_url.trim_end_matches('/'),
            self.tenant.tenant_id
        )
    }
}

/// Table names double as SQL identifiers, so they follow storage-table naming rules
pub(crate) fn validate_table_name(key: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid = starts_with_letter
        && (3..=63).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(Error::config(
            key,
            format!("invalid table name {name:?}: use 3-63 letters or digits, starting with a letter"),
        ))
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_key<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(key, format!("cannot parse {value:?}")))
}

fn default_login_base_url() -> String {
    "https://login.windows.net".to_string()
}

fn default_api_base_url() -> String {
    "https://manage.office.com".to_string()
}

fn default_content_type() -> String {
    "Audit.SharePoint".to_string()
}

fn default_max_concurrency() -> usize {
    200
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_time_zone() -> String {
    "Australia/Sydney".to_string()
}

fn default_window_offset() -> Duration {
    Duration::from_secs(3 * 3600)
}

fn default_window_length() -> Duration {
    Duration::from_secs(3600)
}

fn default_run_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_attempts() -> u32 {
    4
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
