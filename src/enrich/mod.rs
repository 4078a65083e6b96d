//! Record enrichment
//!
//! Coded fields are mapped to display names from static tables ([`mappings`]);
//! SharePoint events are optionally augmented with site and list titles through a
//! [`SiteMetadataProvider`]. Lookup failures never fail a record: they become the
//! [`NOT_FOUND`] / [`NOT_FOUND_OR_ACCESS_DENIED`] sentinels.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::types::{DetailRecord, EnrichedRecord, NOT_FOUND, NOT_FOUND_OR_ACCESS_DENIED};

pub mod mappings;
pub mod site;

pub use mappings::MappingTables;
pub use site::{NoOpSiteMetadata, SharePointRestMetadata, SiteMetadataProvider, is_personal_site};

/// Turns detail records into enriched records
#[derive(Clone)]
pub struct Enricher {
    tables: Arc<MappingTables>,
    sites: Arc<dyn SiteMetadataProvider>,
}

impl Enricher {
    /// Create an enricher over the given tables and metadata provider
    pub fn new(tables: Arc<MappingTables>, sites: Arc<dyn SiteMetadataProvider>) -> Self {
        Self { tables, sites }
    }

    /// Map `UserType` / `RecordType` codes to names
    pub fn map_codes(&self, record: DetailRecord) -> EnrichedRecord {
        let user_type_name = record.user_type.as_deref().map(|code| {
            self.tables
                .user_type_name(code)
                .unwrap_or(NOT_FOUND)
                .to_string()
        });
        let record_type_name = record.record_type.as_deref().map(|code| {
            self.tables
                .record_type_name(code)
                .unwrap_or(NOT_FOUND)
                .to_string()
        });

        EnrichedRecord {
            user_type_name,
            record_type_name,
            ..EnrichedRecord::bare(record)
        }
    }

    /// Enrich one record
    pub async fn enrich(&self, record: DetailRecord) -> EnrichedRecord {
        let mut enriched = self.map_codes(record);
        if self.sites.is_enabled() {
            self.resolve_site(&mut enriched).await;
        }
        enriched
    }

    /// Enrich every record with at most `concurrency` lookups in flight
    pub async fn enrich_all(
        &self,
        records: Vec<DetailRecord>,
        concurrency: usize,
    ) -> Vec<EnrichedRecord> {
        stream::iter(records)
            .map(|record| self.enrich(record))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    async fn resolve_site(&self, enriched: &mut EnrichedRecord) {
        let record = &enriched.record;
        let Some(site_url) = record.site_url.as_deref().filter(|s| !s.is_empty()) else {
            return;
        };
        if record.site.as_deref().is_none_or(str::is_empty) {
            return;
        }
        match Url::parse(site_url) {
            Ok(parsed) if is_personal_site(&parsed) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(id = %record.id, site_url, error = %e, "unparseable site url");
                enriched.web_site_name = Some(NOT_FOUND_OR_ACCESS_DENIED.to_string());
                return;
            }
        }

        let web_title = match self.sites.web_title(site_url).await {
            Ok(title) => title,
            Err(e) => {
                debug!(id = %record.id, site_url, error = %e, "site lookup failed");
                enriched.web_site_name = Some(NOT_FOUND_OR_ACCESS_DENIED.to_string());
                return;
            }
        };

        let list_name = match record.list_id.as_deref().filter(|s| !s.is_empty()) {
            Some(list_id) => Some(match self.sites.list_title(site_url, list_id).await {
                Ok(title) => title,
                Err(e) => {
                    debug!(id = %record.id, site_url, list_id, error = %e, "list lookup failed");
                    NOT_FOUND_OR_ACCESS_DENIED.to_string()
                }
            }),
            None => None,
        };

        enriched.web_site_name = Some(web_title);
        enriched.list_name = list_name;
    }
}
