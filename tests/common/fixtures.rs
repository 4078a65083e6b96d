//! Mock feed fixtures

use super::config::{TENANT, WINDOW_END, WINDOW_START};
use async_trait::async_trait;
use audit_ingest::{AuditRow, Database, Error, RecordStore, Result, RunAnalytics};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Listing endpoint path for the test tenant
pub fn listing_path() -> String {
    format!("/api/v1.0/{}/activity/feed/subscriptions/content", TENANT)
}

/// Full `NextPageUri` value for listing page `page`
pub fn next_page_uri(server: &MockServer, page: &str) -> String {
    format!(
        "{}{}?contentType=Audit.SharePoint&startTime={}&endTime={}&nextPage={}",
        server.uri(),
        listing_path(),
        WINDOW_START,
        WINDOW_END,
        page
    )
}

/// One detail record as the feed returns it
pub fn detail_json(id: &str, operation: &str) -> serde_json::Value {
    serde_json::json!({
        "Id": id,
        "CreationTime": "2024-03-10T11:15:42",
        "Operation": operation,
        "OrganizationId": "org",
        "RecordType": 6,
        "UserKey": "i:0h.f|membership|jane@contoso.com",
        "UserType": 0,
        "Workload": "SharePoint",
        "ClientIP": "10.0.0.1",
        "UserId": "jane@contoso.com",
        "EventSource": "SharePoint",
        "ItemType": "File",
        "SiteUrl": "https://contoso.sharepoint.com/sites/hr/",
        "SourceFileName": format!("{id}.docx")
    })
}

/// Pointer JSON for content `id` served by `server`
pub fn pointer_json(server: &MockServer, id: &str) -> serde_json::Value {
    serde_json::json!({
        "contentUri": format!("{}/content/{}", server.uri(), id),
        "contentId": id,
        "contentType": "Audit.SharePoint",
        "contentCreated": "2024-03-10T11:20:00.000Z",
        "contentExpiration": "2024-03-17T11:20:00.000Z"
    })
}

/// Mount a listing page
///
/// `page` is `None` for the first page (no `nextPage` parameter). `next` is the
/// `NextPageUri` to return, if any. The page must be requested exactly once.
pub async fn mount_listing_page(
    server: &MockServer,
    page: Option<&str>,
    content_ids: &[&str],
    next: Option<String>,
) {
    let body: Vec<_> = content_ids.iter().map(|id| pointer_json(server, id)).collect();
    let mut response = ResponseTemplate::new(200).set_body_json(body);
    if let Some(next) = next {
        response = response.insert_header("NextPageUri", next.as_str());
    }

    let mock = Mock::given(method("GET"))
        .and(path(listing_path()))
        .and(query_param("contentType", "Audit.SharePoint"))
        .and(query_param("startTime", WINDOW_START))
        .and(query_param("endTime", WINDOW_END));
    let mock = match page {
        Some(page) => mock.and(query_param("nextPage", page)),
        None => mock.and(query_param_is_missing("nextPage")),
    };
    mock.respond_with(response).expect(1).mount(server).await;
}

/// Mount the detail batch for content `id`
pub async fn mount_details(server: &MockServer, id: &str, records: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/content/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .mount(server)
        .await;
}

/// Store that fails every audit write but records analytics in a real database
pub struct FailingRecordStore {
    pub inner: Arc<Database>,
}

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn upsert_audit_row(&self, row: &AuditRow) -> Result<()> {
        Err(Error::HttpStatus {
            status: 500,
            url: format!("store://{}/{}", row.partition_key, row.row_key),
        })
    }

    async fn upsert_run_analytics(&self, analytics: &RunAnalytics) -> Result<()> {
        self.inner.upsert_run_analytics(analytics).await
    }
}
