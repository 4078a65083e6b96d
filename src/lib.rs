//! # audit-ingest
//!
//! Scheduled ingestion of management-API activity/audit events into a keyed store.
//!
//! Each run requests one hour-aligned window from the activity feed, walks every
//! listing page, expands the content pointers into detail records with
//! bounded-concurrency fetches and retry, enriches and filters those records, and
//! upserts the accepted ones into SQLite. A per-run analytics row is written when
//! the run starts and again when it ends, whatever the outcome.
//!
//! ## Quick Start
//!
//! ```no_run
//! use audit_ingest::{Config, RunCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let coordinator = RunCoordinator::from_config(config).await?;
//!
//!     let analytics = coordinator.run().await;
//!     println!(
//!         "{}: {} of {} records stored",
//!         analytics.status, analytics.included_count, analytics.total_count
//!     );
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Run analytics recording
pub mod analytics;
/// Access-token acquisition
pub mod auth;
/// Operation allow-list filtering
pub mod classify;
/// Configuration types
pub mod config;
/// Run coordination
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Record enrichment
pub mod enrich;
/// Error types
pub mod error;
/// Activity feed client
pub mod feed;
/// Retry logic for detail fetches
pub mod retry;
/// Recurring run scheduling
pub mod scheduler_task;
/// Store writer
pub mod store;
/// Core types
pub mod types;

// Re-export commonly used types
pub use auth::{OAuthTokenProvider, StaticToken, TokenProvider};
pub use classify::{AllowList, Classification, OperationSet, classify};
pub use config::{Config, ListingFailurePolicy, RetryConfig};
pub use coordinator::{Collaborators, RunCoordinator, RunPhase};
pub use db::{AuditRow, Database, RecordStore};
pub use enrich::{
    Enricher, MappingTables, NoOpSiteMetadata, SharePointRestMetadata, SiteMetadataProvider,
};
pub use error::{DatabaseError, Error, Result};
pub use feed::FeedClient;
pub use scheduler_task::IngestScheduler;
pub use types::{
    ContentPointer, DetailRecord, EnrichedRecord, ListingPage, RunAnalytics, RunStatus, RunWindow,
};

/// Run the scheduler until a termination signal arrives.
///
/// The signal cancels the scheduler; a run that is in flight finishes (and writes
/// its analytics) before this returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use audit_ingest::{Config, RunCoordinator, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let coordinator = RunCoordinator::from_config(Config::from_env()?).await?;
///     let runs = run_with_shutdown(Arc::new(coordinator)).await?;
///     println!("completed {runs} runs");
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(coordinator: std::sync::Arc<RunCoordinator>) -> Result<u64> {
    let cancel = tokio_util::sync::CancellationToken::new();
    let scheduler = IngestScheduler::new(coordinator, cancel.clone());
    let handle = tokio::spawn(scheduler.run());

    wait_for_signal().await;
    cancel.cancel();

    handle
        .await
        .map_err(|e| Error::Other(format!("scheduler task panicked: {}", e)))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
