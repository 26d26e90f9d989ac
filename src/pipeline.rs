//! Snapshot ingestion runs: NewsData API, catalog feeds, and the probe.
//!
//! Every run is the same straight line:
//!
//! ```text
//! fetch ─► normalize ─► load snapshot ─► dedupe + merge ─► record run ─► atomic save
//! ```
//!
//! Fetchers are generic over [`FetchAsync`] so the whole line can be driven
//! by scripted sources in tests.

use crate::api::{FetchAsync, RetryFetch, RetryPolicy};
use crate::catalog::{FeedSelection, SelectedFeed, load_catalog, select_feeds};
use crate::error::{IngestError, Result};
use crate::models::{FeedError, Provider, RunRecord};
use crate::normalize::{Normalized, normalize_newsdata, normalize_rss};
use crate::outputs::snapshot::{load_snapshot, merge, record_run, save_snapshot};
use crate::scrapers::newsdata::{NewsDataClient, NewsDataPage, NewsDataQuery, paginate};
use crate::scrapers::rss::{FeedClient, RssEntry, fetch_feeds};
use crate::utils::{format_utc, truncate_for_log, utc_now};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Settings for a NewsData ingestion run.
#[derive(Clone)]
pub struct FetchOptions {
    pub output: PathBuf,
    pub base_url: String,
    pub api_key: String,
    pub query: NewsDataQuery,
    pub start_page: Option<String>,
    pub max_pages: usize,
    pub request_interval: Duration,
    pub max_articles: Option<usize>,
    pub retry: RetryPolicy,
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("output", &self.output)
            .field("base_url", &self.base_url)
            .field("query", &self.query)
            .field("start_page", &self.start_page)
            .field("max_pages", &self.max_pages)
            .field("max_articles", &self.max_articles)
            .finish_non_exhaustive()
    }
}

/// Settings for a catalog-feed ingestion run.
#[derive(Debug, Clone)]
pub struct RssOptions {
    pub catalog_path: PathBuf,
    pub selection: FeedSelection,
    pub output: PathBuf,
    pub max_articles: Option<usize>,
    pub retry: RetryPolicy,
}

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub added: usize,
    pub evicted: usize,
    pub total_articles: usize,
    pub errors: usize,
}

/// Merge a normalized batch into the snapshot at `output` and save it.
///
/// `run` arrives with its fetch-side fields filled in; the dedupe counts are
/// added here before it is appended.
#[instrument(level = "info", skip_all, fields(path = %output.display()))]
async fn persist_batch(
    output: &std::path::Path,
    batch: Normalized,
    mut run: RunRecord,
    max_articles: Option<usize>,
    now: DateTime<Utc>,
) -> Result<RunSummary> {
    let mut snapshot = load_snapshot(output).await?;
    let normalized = batch.articles.len();
    let stats = merge(&mut snapshot, batch.articles, max_articles);

    run.normalized = normalized;
    run.skipped = batch.skipped;
    run.duplicates = stats.duplicates;
    run.added = stats.added;
    run.evicted = stats.evicted;

    let summary = RunSummary {
        fetched: run.results_count,
        normalized,
        skipped: batch.skipped,
        duplicates: stats.duplicates,
        added: stats.added,
        evicted: stats.evicted,
        total_articles: snapshot.articles.len(),
        errors: run.errors.len(),
    };
    let unscored = snapshot
        .articles
        .iter()
        .filter(|a| a.analytics.is_unknown())
        .count();
    debug!(unscored, "Articles awaiting analytic scores");

    record_run(&mut snapshot, run, now);
    save_snapshot(&snapshot, output).await?;

    info!(
        fetched = summary.fetched,
        normalized = summary.normalized,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        written = summary.added,
        evicted = summary.evicted,
        total = summary.total_articles,
        updated_at = %format_utc(&now),
        "Snapshot updated"
    );
    if summary.skipped > 0 {
        warn!(count = summary.skipped, "Skipped malformed records");
    }
    Ok(summary)
}

/// Page through NewsData with `fetcher` and merge the results into the snapshot.
pub async fn ingest_newsdata<F>(fetcher: &F, opts: &FetchOptions) -> Result<RunSummary>
where
    F: FetchAsync<Request = Option<String>, Response = NewsDataPage>,
{
    let pagination = paginate(
        fetcher,
        opts.start_page.clone(),
        opts.max_pages,
        opts.request_interval,
    )
    .await?;

    let fetched_at = utc_now();
    let batch = normalize_newsdata(pagination.records(), fetched_at);
    let results_count = pagination.records().count();

    let run = RunRecord {
        fetched_at: Some(fetched_at),
        provider: Some(Provider::Newsdata),
        params: opts.query.describe(opts.start_page.as_deref(), opts.max_pages),
        status: Some(if pagination.error.is_some() { "partial" } else { "success" }.to_string()),
        total_results: pagination.total_results(),
        pages: pagination.pages.len(),
        results_count,
        next_page: pagination.next_page.clone(),
        errors: pagination
            .error
            .iter()
            .map(|e| FeedError {
                feed_url: None,
                source_id: None,
                item_id: None,
                error: e.clone(),
            })
            .collect(),
        ..Default::default()
    };

    if let Some(cursor) = &pagination.next_page {
        info!(%cursor, "More results available; pass --start-page to resume");
    }
    persist_batch(&opts.output, batch, run, opts.max_articles, fetched_at).await
}

/// NewsData run against the live API.
#[instrument(level = "info", skip_all, fields(output = %opts.output.display()))]
pub async fn run_fetch(http: &Client, opts: &FetchOptions) -> Result<RunSummary> {
    let client = RetryFetch::new(
        NewsDataClient::new(
            http.clone(),
            opts.base_url.clone(),
            opts.api_key.clone(),
            opts.query.clone(),
        ),
        opts.retry,
    );
    ingest_newsdata(&client, opts).await
}

/// Normalize per-feed fetch outcomes and merge them into the snapshot.
pub async fn ingest_feeds(
    fetched: Vec<(SelectedFeed, Result<Vec<RssEntry>>)>,
    opts: &RssOptions,
) -> Result<RunSummary> {
    let fetched_at = utc_now();
    let mut batch = Normalized::default();
    let mut errors = Vec::new();
    let mut results_count = 0;
    let feeds = fetched.len();

    for (feed, outcome) in fetched {
        match outcome {
            Ok(entries) => {
                results_count += entries.len();
                let n = normalize_rss(&entries, &feed, fetched_at);
                batch.articles.extend(n.articles);
                batch.skipped += n.skipped;
            }
            Err(e) => errors.push(FeedError {
                feed_url: Some(feed.feed_url.clone()),
                source_id: Some(feed.source_id.clone()),
                item_id: None,
                error: e.to_string(),
            }),
        }
    }
    if !errors.is_empty() {
        warn!(failed = errors.len(), feeds, "Some feeds could not be fetched");
    }

    let run = RunRecord {
        fetched_at: Some(fetched_at),
        provider: Some(Provider::Rss),
        params: json!({
            "catalog_path": opts.catalog_path.display().to_string(),
            "max_sources": opts.selection.max_sources,
            "feeds_per_source": opts.selection.feeds_per_source,
            "source_ids": opts.selection.source_ids,
        }),
        status: Some(if errors.is_empty() { "success" } else { "partial" }.to_string()),
        total_results: Some(results_count as u64),
        pages: feeds,
        results_count,
        errors,
        ..Default::default()
    };
    persist_batch(&opts.output, batch, run, opts.max_articles, fetched_at).await
}

/// Catalog-feed run: fetch each selected feed in turn, then merge.
#[instrument(level = "info", skip_all, fields(catalog = %opts.catalog_path.display()))]
pub async fn run_rss(http: &Client, opts: &RssOptions) -> Result<RunSummary> {
    let catalog = load_catalog(&opts.catalog_path).await?;
    let feeds = select_feeds(&catalog, &opts.selection);
    if feeds.is_empty() {
        error!("No feeds selected; check catalog or filters");
        return Err(IngestError::Config(
            "no feeds selected; check catalog or filters".into(),
        ));
    }
    info!(feeds = feeds.len(), "Selected feeds");

    let client = RetryFetch::new(FeedClient::new(http.clone()), opts.retry);
    let fetched = fetch_feeds(&client, feeds).await;

    ingest_feeds(fetched, opts).await
}

/// One-line outcome of a size-1 NewsData request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: String,
    pub total_results: Option<u64>,
    pub results: usize,
    /// `source_name`, else `source_id`, of the top result.
    pub top_source: Option<String>,
    pub top_title: Option<String>,
    /// Publish time of the top result as the provider sent it.
    pub top_published: Option<String>,
    pub has_next_page: bool,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} total_results={} results={} next_page={}",
            self.status,
            self.total_results
                .map_or_else(|| "?".to_string(), |n| n.to_string()),
            self.results,
            if self.has_next_page { "yes" } else { "no" },
        )?;
        if self.results > 0 {
            write!(
                f,
                " top_source={:?} top_title={:?} published={:?}",
                self.top_source.as_deref().unwrap_or("unknown"),
                self.top_title.as_deref().unwrap_or("(no title)"),
                self.top_published.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }
}

fn top_field(record: Option<&serde_json::Value>, keys: &[&str]) -> Option<String> {
    let record = record?;
    keys.iter()
        .filter_map(|k| record.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(|v| truncate_for_log(v, 120))
}

/// Single request smoke test; nothing is written.
pub async fn probe<F>(fetcher: &F) -> Result<ProbeReport>
where
    F: FetchAsync<Request = Option<String>, Response = NewsDataPage>,
{
    let page = fetcher.fetch(&None).await?;
    let top = page.records.first();
    Ok(ProbeReport {
        top_source: top_field(top, &["source_name", "source_id"]),
        top_title: top_field(top, &["title"]),
        top_published: top_field(top, &["pubDate", "published_at"]),
        status: page.status,
        total_results: page.total_results,
        results: page.records.len(),
        has_next_page: page.next_page.is_some(),
    })
}

/// Probe the live API with a size-1 request.
#[instrument(level = "info", skip_all)]
pub async fn run_probe(
    http: &Client,
    base_url: &str,
    api_key: &str,
    mut query: NewsDataQuery,
    retry: RetryPolicy,
) -> Result<ProbeReport> {
    query.size = 1;
    let client = RetryFetch::new(NewsDataClient::new(http.clone(), base_url, api_key, query), retry);
    let report = probe(&client).await?;
    info!(status = %report.status, results = report.results, "Probe finished");
    Ok(report)
}
