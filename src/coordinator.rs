//! Run coordinator
//!
//! Drives one ingestion run end to end:
//!
//! 1. compute the run window and write a `Started` analytics row
//! 2. acquire a token and walk every listing page, fetching detail batches per page
//! 3. enrich, classify and write the accepted records
//! 4. write the final analytics row, whatever happened before
//!
//! [`RunCoordinator::run`] never returns an error; the returned [`RunAnalytics`]
//! (and its stored copy) is the only signal of the run's outcome.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::analytics::AnalyticsRecorder;
use crate::auth::{OAuthTokenProvider, TokenProvider};
use crate::classify::{AllowList, classify};
use crate::config::{Config, ListingFailurePolicy};
use crate::db::{Database, RecordStore};
use crate::enrich::{
    Enricher, MappingTables, NoOpSiteMetadata, SharePointRestMetadata, SiteMetadataProvider,
};
use crate::error::{Error, Result};
use crate::feed::{FeedClient, continuation_query};
use crate::store::StoreWriter;
use crate::types::{DetailRecord, RunAnalytics, RunWindow, local_zone};

/// Phases of a run, logged as the run progresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// `Started` row being written
    Init,
    /// Window derived, token being acquired
    WindowComputed,
    /// Walking listing pages
    Paging,
    /// Fetching detail batches for a page
    Fetching,
    /// Mapping codes and resolving site metadata
    Enriching,
    /// Writing accepted records
    Writing,
    /// Final analytics row written
    AnalyticsRecorded,
    /// Run finished
    Done,
    /// Run stopped on an unrecoverable error
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::WindowComputed => "window_computed",
            RunPhase::Paging => "paging",
            RunPhase::Fetching => "fetching",
            RunPhase::Enriching => "enriching",
            RunPhase::Writing => "writing",
            RunPhase::AnalyticsRecorded => "analytics_recorded",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// External collaborators of a run
pub struct Collaborators {
    /// Token source for the management API
    pub tokens: Arc<dyn TokenProvider>,
    /// Keyed store for records and analytics
    pub store: Arc<dyn RecordStore>,
    /// Site/list title lookups
    pub sites: Arc<dyn SiteMetadataProvider>,
    /// Code-to-name tables
    pub mappings: Arc<MappingTables>,
    /// Operations to persist
    pub allow_list: Arc<AllowList>,
}

/// Runs the ingestion pipeline
pub struct RunCoordinator {
    config: Arc<Config>,
    tokens: Arc<dyn TokenProvider>,
    enricher: Enricher,
    allow_list: Arc<AllowList>,
    writer: StoreWriter,
    recorder: AnalyticsRecorder,
}

impl RunCoordinator {
    /// Create a coordinator over explicit collaborators
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(config: Arc<Config>, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let zone = local_zone(&config.schedule.time_zone)?;

        let writer = StoreWriter::new(collaborators.store.clone(), &config.storage, zone);
        let recorder = AnalyticsRecorder::new(
            collaborators.store,
            config.storage.analytics_table.clone(),
        );

        Ok(Self {
            tokens: collaborators.tokens,
            enricher: Enricher::new(collaborators.mappings, collaborators.sites),
            allow_list: collaborators.allow_list,
            writer,
            recorder,
            config,
        })
    }

    /// Create a coordinator with the production collaborators
    ///
    /// Opens the SQLite store, loads the static data and sets up OAuth token
    /// providers for the management API and, when enabled, the site metadata
    /// service.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(
            &config.storage.database_path,
            &config.storage.data_table,
            &config.storage.analytics_table,
        )
        .await?;

        let tokens: Arc<dyn TokenProvider> =
            Arc::new(OAuthTokenProvider::client_credentials(&config)?);

        let sites: Arc<dyn SiteMetadataProvider> = if config.enrichment.site_metadata {
            let site_tokens = Arc::new(OAuthTokenProvider::site_user(&config)?);
            Arc::new(SharePointRestMetadata::new(
                site_tokens,
                config.feed.request_timeout,
            )?)
        } else {
            Arc::new(NoOpSiteMetadata)
        };

        let mappings = MappingTables::load(config.enrichment.mappings_file.as_deref()).await?;
        let allow_list = AllowList::load(config.enrichment.operations_file.as_deref()).await?;

        info!(
            tenant = %config.tenant.tenant_id,
            operations = allow_list.len(),
            site_metadata = config.enrichment.site_metadata,
            "ingestion configured"
        );

        Self::new(
            Arc::new(config),
            Collaborators {
                tokens,
                store: Arc::new(db),
                sites,
                mappings: Arc::new(mappings),
                allow_list: Arc::new(allow_list),
            },
        )
    }

    /// Configuration this coordinator runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run once for the current time
    pub async fn run(&self) -> RunAnalytics {
        self.run_at(Utc::now()).await
    }

    /// Run once as if started at `now`
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunAnalytics {
        let ops_prefix = &self.config.storage.ops_partition_prefix;

        let window = match RunWindow::compute(now, &self.config.schedule) {
            Ok(window) => window,
            Err(e) => {
                // Still leave a trace keyed by the UTC start time
                let window = RunWindow {
                    run_id: now.format("%Y_%m_%dT%H_%M").to_string(),
                    start: now,
                    end: now,
                    run_date: now.format("%Y_%m_%d").to_string(),
                    run_hour: now.format("%H:%M").to_string(),
                };
                let mut analytics = RunAnalytics::started(&window, ops_prefix);
                return self.finish(analytics_failed(&mut analytics, &e)).await;
            }
        };

        let mut analytics = RunAnalytics::started(&window, ops_prefix);
        self.enter(&window, RunPhase::Init);
        if let Err(e) = self.recorder.record(&analytics).await {
            return self.finish(analytics_failed(&mut analytics, &e)).await;
        }

        match self.execute(&window, &mut analytics).await {
            Ok(()) => analytics.complete(),
            Err(e) => {
                analytics_failed(&mut analytics, &e);
            }
        }

        self.finish(&mut analytics).await
    }

    async fn finish(&self, analytics: &mut RunAnalytics) -> RunAnalytics {
        match self.recorder.record(analytics).await {
            Ok(()) => info!(
                run_id = %analytics.row_key,
                phase = %RunPhase::AnalyticsRecorded,
                "run phase"
            ),
            Err(e) => {
                error!(run_id = %analytics.row_key, error = %e, "final analytics write failed");
                if analytics.success {
                    analytics.fail(&e);
                }
            }
        }

        let phase = if analytics.success {
            RunPhase::Done
        } else {
            RunPhase::Failed
        };
        info!(
            run_id = %analytics.row_key,
            phase = %phase,
            status = %analytics.status,
            total = analytics.total_count,
            included = analytics.included_count,
            excluded = analytics.excluded_count,
            "run finished"
        );
        analytics.clone()
    }

    async fn execute(&self, window: &RunWindow, analytics: &mut RunAnalytics) -> Result<()> {
        self.enter(window, RunPhase::WindowComputed);
        info!(
            run_id = %window.run_id,
            start = %window.start,
            end = %window.end,
            "requesting audit window"
        );

        let token = self
            .tokens
            .access_token(&self.config.tenant.auth_resource)
            .await?;
        let client = FeedClient::new(&self.config.feed, &token)?;

        let records = self.collect_records(&client, window).await?;

        self.enter(window, RunPhase::Enriching);
        let enriched = self
            .enricher
            .enrich_all(records, self.config.feed.max_concurrency)
            .await;

        let classification = classify(enriched, &self.allow_list);
        analytics.record_classification(&classification);
        info!(
            run_id = %window.run_id,
            included = classification.included.len(),
            excluded = classification.excluded.len(),
            "records classified"
        );

        self.enter(window, RunPhase::Writing);
        self.writer.write_all(&classification.included).await?;

        Ok(())
    }

    /// Walk every listing page and fetch the detail batches behind each one
    async fn collect_records(
        &self,
        client: &FeedClient,
        window: &RunWindow,
    ) -> Result<Vec<DetailRecord>> {
        let base_url = self.config.listing_url();
        let mut query = window.listing_query(&self.config.feed.content_type);
        let mut visited: HashSet<String> = HashSet::new();
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            if !visited.insert(query.clone()) {
                return Err(Error::InvalidContinuation(format!(
                    "continuation repeats an already visited page: {}",
                    query
                )));
            }

            self.enter(window, RunPhase::Paging);
            let page = match client.fetch_page(&base_url, &query).await {
                Ok(page) => page,
                Err(e) => match self.config.feed.listing_failure_policy {
                    ListingFailurePolicy::FailRun => return Err(e),
                    ListingFailurePolicy::EndOfFeed => {
                        warn!(
                            run_id = %window.run_id,
                            error = %e,
                            "listing page failed, treating as end of feed"
                        );
                        break;
                    }
                },
            };
            pages += 1;

            self.enter(window, RunPhase::Fetching);
            let batch = client
                .fetch_all_details(&page.pointers, self.config.feed.max_concurrency)
                .await;
            info!(
                run_id = %window.run_id,
                page = pages,
                pointers = page.pointers.len(),
                records = batch.len(),
                "listing page processed"
            );
            records.extend(batch);

            match page.continuation {
                Some(next) => query = continuation_query(&next)?,
                None => break,
            }
        }

        info!(
            run_id = %window.run_id,
            pages,
            records = records.len(),
            "feed drained"
        );
        Ok(records)
    }

    fn enter(&self, window: &RunWindow, phase: RunPhase) {
        info!(run_id = %window.run_id, phase = %phase, "run phase");
    }
}

fn analytics_failed<'a>(analytics: &'a mut RunAnalytics, e: &Error) -> &'a mut RunAnalytics {
    error!(
        run_id = %analytics.row_key,
        phase = %RunPhase::Failed,
        error = %e,
        "run failed"
    );
    analytics.fail(e);
    analytics
}
