//! NewsData.io article API client.
//!
//! Pages through `GET /api/1/news` using the `nextPage` cursor the API hands
//! back. One page is one [`FetchAsync`] round trip; retries come from
//! wrapping the client in [`RetryFetch`](crate::api::RetryFetch) and the page
//! loop lives in [`paginate`].
//!
//! # Response Shapes
//!
//! ```text
//! success: { "status": "success", "totalResults": 123, "results": [...], "nextPage": "1700..." }
//! error:   { "status": "error", "results": { "message": "...", "code": "..." } }
//! ```

use crate::api::{FetchAsync, check_status};
use crate::error::{IngestError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const NEWSDATA_BASE_URL: &str = "https://newsdata.io/api/1/news";

/// Query parameters sent with every page request (the key is added separately).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsDataQuery {
    pub query: Option<String>,
    pub category: String,
    pub country: String,
    pub language: String,
    pub size: u32,
}

impl NewsDataQuery {
    /// Parameters as logged in the snapshot run record.
    pub fn describe(&self, start_page: Option<&str>, max_pages: usize) -> Value {
        json!({
            "query": self.query,
            "category": self.category,
            "country": self.country,
            "language": self.language,
            "size": self.size,
            "page": start_page,
            "max_pages": max_pages,
        })
    }
}

/// One decoded page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsDataPage {
    pub status: String,
    pub total_results: Option<u64>,
    /// Raw article objects, passed on to the normalizer untouched.
    pub records: Vec<Value>,
    /// `None` signals the end of results.
    pub next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    status: String,
    #[serde(rename = "totalResults", default)]
    total_results: Option<u64>,
    #[serde(default)]
    results: Value,
    #[serde(rename = "nextPage", default)]
    next_page: Value,
    #[serde(default)]
    message: Option<String>,
}

/// Turn a decoded body into a page or a classified error.
pub fn decode_page(body: Value) -> Result<NewsDataPage> {
    let raw: RawResponse = serde_json::from_value(body)?;

    if raw.status != "success" {
        let message = raw
            .message
            .clone()
            .or_else(|| raw.results.get("message").and_then(Value::as_str).map(str::to_string))
            .or_else(|| raw.results.as_str().map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());
        let code = raw
            .results
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if code.contains("ratelimit") || code.contains("toomanyrequests") {
            return Err(IngestError::RateLimited {
                retry_after: None,
                message,
            });
        }
        if code.contains("unauthorized") || code.contains("apikey") {
            return Err(IngestError::Auth {
                status: 401,
                message,
            });
        }
        return Err(IngestError::Api(message));
    }

    let records = match raw.results {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            warn!(kind = %json_kind(&other), "Unexpected results shape; treating as empty page");
            Vec::new()
        }
    };

    let next_page = match raw.next_page {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };

    Ok(NewsDataPage {
        status: raw.status,
        total_results: raw.total_results,
        records,
        next_page,
    })
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Single-attempt NewsData client.
pub struct NewsDataClient {
    http: Client,
    base_url: String,
    api_key: String,
    query: NewsDataQuery,
}

impl std::fmt::Debug for NewsDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsDataClient")
            .field("base_url", &self.base_url)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl NewsDataClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>, query: NewsDataQuery) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            query,
        }
    }

    /// Full request URL for `cursor`. Contains the API key; never log it.
    pub fn page_url(&self, cursor: Option<&str>) -> Result<Url> {
        let mut params: Vec<(&str, String)> = vec![
            ("apikey", self.api_key.clone()),
            ("category", self.query.category.clone()),
            ("country", self.query.country.clone()),
            ("language", self.query.language.clone()),
            ("size", self.query.size.to_string()),
        ];
        if let Some(q) = self.query.query.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(("q", q.to_string()));
        }
        if let Some(page) = cursor {
            params.push(("page", page.to_string()));
        }
        Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| IngestError::Config(format!("invalid base URL {}: {e}", self.base_url)))
    }
}

impl FetchAsync for NewsDataClient {
    type Request = Option<String>;
    type Response = NewsDataPage;

    #[instrument(level = "info", skip_all, fields(page = cursor.as_deref().unwrap_or("first")))]
    async fn fetch(&self, cursor: &Option<String>) -> Result<NewsDataPage> {
        let url = self.page_url(cursor.as_deref())?;
        let response = self.http.get(url).send().await?;
        let response = check_status(response).await?;
        let body: Value = response.json().await?;
        let page = decode_page(body)?;
        debug!(
            results = page.records.len(),
            total = ?page.total_results,
            next = ?page.next_page,
            "Fetched NewsData page"
        );
        Ok(page)
    }
}

/// Result of walking the cursor chain.
#[derive(Debug, Default)]
pub struct Pagination {
    pub pages: Vec<NewsDataPage>,
    /// Cursor to resume from, `None` when results were exhausted.
    pub next_page: Option<String>,
    /// Set when a later page failed and the walk stopped early.
    pub error: Option<String>,
}

impl Pagination {
    pub fn records(&self) -> impl Iterator<Item = &Value> {
        self.pages.iter().flat_map(|p| p.records.iter())
    }

    pub fn total_results(&self) -> Option<u64> {
        self.pages.first().and_then(|p| p.total_results)
    }
}

/// Fetch pages until the provider stops returning a cursor or `max_pages`
/// pages have been read.
///
/// The first page failing is fatal. A later page failing ends the walk with
/// what was collected so far, unless it is an authentication failure. A
/// cursor the provider already returned also ends the walk. `interval` is
/// slept between consecutive requests to stay under the provider rate limit.
///
/// # Arguments
///
/// * `fetcher` - Page source, normally a [`NewsDataClient`] wrapped in `RetryFetch`
/// * `start` - Cursor to resume from, or `None` for the first page
/// * `max_pages` - Upper bound on requests made by this call
/// * `interval` - Pause between consecutive requests
///
/// # Returns
///
/// The pages read, the cursor to resume from (`None` once results ran out
/// or the provider repeated itself), and the error text if a later page
/// failed.
///
/// # Errors
///
/// Whatever the first request failed with, or an authentication failure on
/// any page.
#[instrument(level = "info", skip_all, fields(max_pages = max_pages))]
pub async fn paginate<F>(
    fetcher: &F,
    start: Option<String>,
    max_pages: usize,
    interval: Duration,
) -> Result<Pagination>
where
    F: FetchAsync<Request = Option<String>, Response = NewsDataPage>,
{
    let mut out = Pagination::default();
    let mut cursor = start;
    let mut seen: Vec<String> = cursor.iter().cloned().collect();

    while out.pages.len() < max_pages {
        if !out.pages.is_empty() && !interval.is_zero() {
            sleep(interval).await;
        }
        let page = match fetcher.fetch(&cursor).await {
            Ok(page) => page,
            Err(e) if out.pages.is_empty() || matches!(e, IngestError::Auth { .. }) => {
                return Err(e);
            }
            Err(e) => {
                warn!(pages = out.pages.len(), error = %e, "Page fetch failed; keeping pages fetched so far");
                out.error = Some(e.to_string());
                out.next_page = cursor;
                return Ok(out);
            }
        };

        let next = page.next_page.clone();
        out.pages.push(page);

        match next {
            Some(c) if seen.contains(&c) => {
                warn!(cursor = %c, "Provider repeated a cursor; stopping");
                cursor = None;
                break;
            }
            Some(c) => {
                seen.push(c.clone());
                cursor = Some(c);
            }
            None => {
                cursor = None;
                break;
            }
        }
    }

    out.next_page = cursor;
    info!(
        pages = out.pages.len(),
        records = out.records().count(),
        more = out.next_page.is_some(),
        "Pagination finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryFetch;
    use crate::api::tests::fast_policy;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Serves scripted pages and records the cursor of every request.
    struct FakePages {
        script: RefCell<VecDeque<Result<NewsDataPage>>>,
        cursors: RefCell<Vec<Option<String>>>,
    }

    impl FakePages {
        fn new(script: Vec<Result<NewsDataPage>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                cursors: RefCell::new(Vec::new()),
            }
        }
    }

    impl FetchAsync for FakePages {
        type Request = Option<String>;
        type Response = NewsDataPage;

        async fn fetch(&self, cursor: &Option<String>) -> Result<NewsDataPage> {
            self.cursors.borrow_mut().push(cursor.clone());
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(IngestError::Api("no more pages scripted".into())))
        }
    }

    fn page(n: usize, next: Option<&str>) -> NewsDataPage {
        NewsDataPage {
            status: "success".into(),
            total_results: Some(30),
            records: (0..n).map(|i| json!({"article_id": format!("a{i}")})).collect(),
            next_page: next.map(str::to_string),
        }
    }

    fn query() -> NewsDataQuery {
        NewsDataQuery {
            query: Some("climate".into()),
            category: "top".into(),
            country: "us".into(),
            language: "en".into(),
            size: 10,
        }
    }

    #[tokio::test]
    async fn test_pagination_stops_at_last_page() {
        let fake = FakePages::new(vec![
            Ok(page(10, Some("p2"))),
            Ok(page(10, Some("p3"))),
            Ok(page(5, None)),
        ]);
        let out = paginate(&fake, None, 10, Duration::ZERO).await.unwrap();
        assert_eq!(out.pages.len(), 3);
        assert_eq!(out.records().count(), 25);
        assert!(out.next_page.is_none());
        assert_eq!(
            *fake.cursors.borrow(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_pagination_bounded_by_max_pages() {
        let fake = FakePages::new(vec![Ok(page(1, Some("p2"))), Ok(page(1, Some("p3")))]);
        let out = paginate(&fake, Some("p1".into()), 2, Duration::ZERO).await.unwrap();
        assert_eq!(out.pages.len(), 2);
        assert_eq!(out.next_page.as_deref(), Some("p3"));
    }

    #[tokio::test]
    async fn test_pagination_stops_on_repeated_cursor() {
        let fake = FakePages::new(vec![Ok(page(1, Some("p2"))), Ok(page(1, Some("p2")))]);
        let out = paginate(&fake, None, 10, Duration::ZERO).await.unwrap();
        assert_eq!(out.pages.len(), 2);
        assert!(out.next_page.is_none());
    }

    #[tokio::test]
    async fn test_first_page_failure_is_fatal() {
        let fake = FakePages::new(vec![Err(IngestError::Api("quota".into()))]);
        assert!(paginate(&fake, None, 3, Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_later_failure_keeps_partial_results() {
        let fake = FakePages::new(vec![
            Ok(page(2, Some("p2"))),
            Err(IngestError::Status {
                status: 502,
                message: "bad gateway".into(),
            }),
        ]);
        let out = paginate(&fake, None, 5, Duration::ZERO).await.unwrap();
        assert_eq!(out.pages.len(), 1);
        assert_eq!(out.next_page.as_deref(), Some("p2"));
        assert!(out.error.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn test_later_auth_failure_is_fatal() {
        let fake = FakePages::new(vec![
            Ok(page(2, Some("p2"))),
            Err(IngestError::Auth {
                status: 403,
                message: "revoked".into(),
            }),
        ]);
        let err = paginate(&fake, None, 5, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, IngestError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_page_is_retried_within_pagination() {
        let fake = FakePages::new(vec![
            Ok(page(1, Some("p2"))),
            Err(IngestError::RateLimited {
                retry_after: None,
                message: "429".into(),
            }),
            Ok(page(1, None)),
        ]);
        let client = RetryFetch::new(fake, fast_policy(3));
        let out = paginate(&client, None, 5, Duration::ZERO).await.unwrap();
        assert_eq!(out.pages.len(), 2);
        assert!(out.error.is_none());
        assert_eq!(client.inner().cursors.borrow().len(), 3);
    }

    #[test]
    fn test_decode_success_page() {
        let body = json!({
            "status": "success",
            "totalResults": 2,
            "results": [{"article_id": "x"}, {"article_id": "y"}],
            "nextPage": "17000"
        });
        let page = decode_page(body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total_results, Some(2));
        assert_eq!(page.next_page.as_deref(), Some("17000"));
    }

    #[test]
    fn test_decode_last_page() {
        let page = decode_page(json!({"status": "success", "results": [], "nextPage": null})).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_decode_error_bodies() {
        let auth = decode_page(json!({
            "status": "error",
            "results": {"message": "API key invalid", "code": "Unauthorized"}
        }))
        .unwrap_err();
        assert!(matches!(auth, IngestError::Auth { .. }));

        let limited = decode_page(json!({
            "status": "error",
            "results": {"message": "slow down", "code": "RateLimitExceeded"}
        }))
        .unwrap_err();
        assert!(limited.is_retryable());

        let other = decode_page(json!({
            "status": "error",
            "results": {"message": "bad category", "code": "UnsupportedFilter"}
        }))
        .unwrap_err();
        assert_eq!(other.to_string(), "API error: bad category");
    }

    #[test]
    fn test_page_url_params() {
        let client = NewsDataClient::new(Client::new(), NEWSDATA_BASE_URL, "k3y", query());
        let url = client.page_url(Some("abc")).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("apikey".into(), "k3y".into())));
        assert!(pairs.contains(&("q".into(), "climate".into())));
        assert!(pairs.contains(&("page".into(), "abc".into())));
        assert!(pairs.contains(&("size".into(), "10".into())));
        assert!(!format!("{client:?}").contains("k3y"));
    }

    #[test]
    fn test_describe_excludes_key() {
        let v = query().describe(None, 3);
        assert_eq!(v["category"], "top");
        assert_eq!(v["max_pages"], 3);
        assert!(v.get("apikey").is_none());
    }
}
