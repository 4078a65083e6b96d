//! Recurring ingestion runs
//!
//! [`IngestScheduler`] starts one run per interval, aligned to interval boundaries
//! (top of the hour by default). Runs execute one after another on the scheduler's
//! task, so a slow run delays the next one instead of overlapping it. Cancellation
//! is observed between runs only.
//!
//! # Example
//!
//! ```no_run
//! use audit_ingest::{Config, RunCoordinator};
//! use audit_ingest::scheduler_task::IngestScheduler;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Arc::new(RunCoordinator::from_config(Config::from_env()?).await?);
//! let cancel = CancellationToken::new();
//! let scheduler = IngestScheduler::new(coordinator, cancel.clone());
//!
//! let handle = tokio::spawn(scheduler.run());
//! // later
//! cancel.cancel();
//! handle.await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::RunCoordinator;

/// Periodically triggers ingestion runs
pub struct IngestScheduler {
    coordinator: Arc<RunCoordinator>,
    interval: Duration,
    cancel: CancellationToken,
}

impl IngestScheduler {
    /// Create a scheduler using the configured run interval
    pub fn new(coordinator: Arc<RunCoordinator>, cancel: CancellationToken) -> Self {
        let interval = coordinator.config().schedule.run_interval;
        Self {
            coordinator,
            interval,
            cancel,
        }
    }

    /// Override the run interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until cancelled; returns the number of completed runs
    pub async fn run(self) -> u64 {
        info!(interval_secs = self.interval.as_secs(), "ingest scheduler started");
        let mut runs = 0u64;

        loop {
            let delay = next_boundary_delay(Utc::now(), self.interval);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }

            let analytics = self.coordinator.run().await;
            runs += 1;
            if !analytics.success {
                warn!(
                    run_id = %analytics.row_key,
                    error = analytics.error.as_deref().unwrap_or("unknown"),
                    "scheduled run failed"
                );
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        info!(runs, "ingest scheduler stopped");
        runs
    }
}

/// Time from `now` until the next multiple of `interval` since the Unix epoch
pub fn next_boundary_delay(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis();
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let now_ms = now.timestamp_millis().max(0) as u128;
    let remaining = interval_ms - (now_ms % interval_ms);
    Duration::from_millis(remaining.min(u64::MAX as u128) as u64)
}
