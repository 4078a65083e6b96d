//! Error types for audit-ingest
//!
//! This module provides the error taxonomy shared by every pipeline stage:
//! - Configuration and authentication failures (fatal before any feed request)
//! - HTTP failures, split into retryable and non-retryable classes
//! - Enrichment lookup failures (always converted to sentinel values by callers)
//! - Store write failures (fatal for the run, always followed by an analytics write)

use thiserror::Error;

/// Result type alias for audit-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for audit-ingest
///
/// Component-local failures (HTTP, lookups) are usually caught close to where they
/// happen and degraded to empty or sentinel results. Only store and analytics write
/// failures reach the run coordinator, which records the run as failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "TenantID")
        key: Option<String>,
    },

    /// Access token could not be acquired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport-level HTTP error (connect, timeout, body decode)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote endpoint answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Status code returned by the endpoint
        status: u16,
        /// Request URL (without credentials)
        url: String,
    },

    /// The listing endpoint returned a continuation that cannot be followed
    #[error("invalid continuation: {0}")]
    InvalidContinuation(String),

    /// Site/list metadata lookup failed
    #[error("enrichment lookup failed: {0}")]
    Enrichment(String),

    /// Writing a row to the keyed store failed
    #[error("store write failed for {table} key {key}: {reason}")]
    StoreWrite {
        /// Logical table the write targeted
        table: String,
        /// `partition_key/row_key` of the failed row
        key: String,
        /// Underlying failure description
        reason: String,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not supported by this collaborator
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// HTTP status code carried by this error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for 4xx responses that must not be retried
    ///
    /// 408 (request timeout) and 429 (throttled) are client-class codes that
    /// signal a transient condition, so they are excluded.
    pub fn is_client_request_error(&self) -> bool {
        matches!(self.http_status(), Some(s) if (400..500).contains(&s) && s != 408 && s != 429)
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}
