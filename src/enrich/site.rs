//! Site and list title lookups against the SharePoint REST API

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::TokenProvider;
use crate::error::{Error, Result};

/// Resolves titles for the site and list an event happened in
#[async_trait]
pub trait SiteMetadataProvider: Send + Sync {
    /// Title of the web at `site_url`
    async fn web_title(&self, site_url: &str) -> Result<String>;

    /// Title of list `list_id` inside the web at `site_url`
    async fn list_title(&self, site_url: &str, list_id: &str) -> Result<String>;

    /// Whether lookups should be attempted at all
    ///
    /// When `false` the enricher leaves site and list names unset instead of
    /// recording a lookup failure.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Provider used when site enrichment is switched off
pub struct NoOpSiteMetadata;

#[async_trait]
impl SiteMetadataProvider for NoOpSiteMetadata {
    async fn web_title(&self, _site_url: &str) -> Result<String> {
        Err(Error::NotSupported("site metadata enrichment is disabled".into()))
    }

    async fn list_title(&self, _site_url: &str, _list_id: &str) -> Result<String> {
        Err(Error::NotSupported("site metadata enrichment is disabled".into()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TitleResponse {
    title: String,
}

/// SharePoint REST implementation
///
/// Tokens are requested for the site's origin (`https://{tenant}.sharepoint.com`),
/// so the provider should carry delegated credentials with read access to the sites.
pub struct SharePointRestMetadata {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl SharePointRestMetadata {
    /// Create a provider authenticating through `tokens`
    pub fn new(tokens: Arc<dyn TokenProvider>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, tokens })
    }

    async fn get_title(&self, site_url: &str, api_path: &str) -> Result<String> {
        let site = Url::parse(site_url)
            .map_err(|e| Error::Enrichment(format!("invalid site url {site_url}: {e}")))?;
        let resource = site.origin().ascii_serialization();
        let token = self.tokens.access_token(&resource).await?;

        let url = format!("{}/{}", site_url.trim_end_matches('/'), api_path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json;odata=nometadata")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body: TitleResponse = response.json().await?;
        Ok(body.title)
    }
}

#[async_trait]
impl SiteMetadataProvider for SharePointRestMetadata {
    async fn web_title(&self, site_url: &str) -> Result<String> {
        self.get_title(site_url, "_api/web?$select=Title").await
    }

    async fn list_title(&self, site_url: &str, list_id: &str) -> Result<String> {
        let id = normalize_guid(list_id)
            .ok_or_else(|| Error::Enrichment(format!("list id {list_id:?} is not a GUID")))?;
        let path = format!("_api/web/lists(guid'{id}')?$select=Title");
        self.get_title(site_url, &path).await
    }
}

/// True for OneDrive / personal sites, which are never enriched
///
/// Personal sites live under a `{tenant}-my` host or a `/personal/` path.
pub fn is_personal_site(site_url: &Url) -> bool {
    let my_host = site_url
        .host_str()
        .and_then(|host| host.split('.').next())
        .is_some_and(|label| label.to_ascii_lowercase().ends_with("-my"));
    let personal_path = site_url
        .path()
        .to_ascii_lowercase()
        .contains("/personal/");
    my_host || personal_path
}

/// Strip braces and validate the 8-4-4-4-12 hex layout
fn normalize_guid(raw: &str) -> Option<String> {
    let id = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let groups: Vec<&str> = id.split('-').collect();
    let layout = [8, 4, 4, 4, 12];
    let valid = groups.len() == layout.len()
        && groups
            .iter()
            .zip(layout)
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()));
    valid.then(|| id.to_ascii_lowercase())
}
