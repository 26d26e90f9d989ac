//! Daily digest job: sample RSS items, summarize each, write a dated snapshot.
//!
//! 1. **Selection**: pick feeds from the catalog
//! 2. **Fetching**: download feeds one after another; a failing feed is
//!    recorded in `errors` and skipped
//! 3. **Sampling**: first `max_items_per_feed` entries per feed, in-run
//!    duplicates dropped, total capped at `max_items`
//! 4. **Summarizing**: one model call per item; a failing item keeps its
//!    feed summary and is recorded in `errors`
//! 5. **Output**: digest file plus archive copy

use crate::api::{FetchAsync, RetryFetch, RetryPolicy};
use crate::catalog::{FeedSelection, SelectedFeed, load_catalog, select_feeds};
use crate::error::{IngestError, Result};
use crate::models::{
    DigestItem, DigestRequest, DigestSnapshot, FeedError, SCHEMA_VERSION, SummarizerReport,
};
use crate::outputs::digest::write_digest;
use crate::scrapers::rss::{FeedClient, RssEntry, fetch_feeds};
use crate::summarize::{ItemSummary, OpenAiSummarizer, summarize_with_backoff};
use crate::utils::{compact_text, strip_html, utc_now};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

const TITLE_LIMIT: usize = 200;
const SUMMARY_LIMIT: usize = 500;

/// Everything a digest run needs, resolved from the CLI and environment.
#[derive(Debug, Clone)]
pub struct DigestOptions {
    pub catalog_path: PathBuf,
    pub selection: FeedSelection,
    pub max_items_per_feed: usize,
    pub max_items: usize,
    pub output: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub skip_summary: bool,
    pub summarizer: SummarizerSettings,
    pub retry: RetryPolicy,
}

#[derive(Clone)]
pub struct SummarizerSettings {
    pub endpoint: String,
    /// Only required once there is something to summarize.
    pub api_key: Option<String>,
    pub model: String,
}

impl std::fmt::Debug for SummarizerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizerSettings")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Stable short id: first 12 hex chars of SHA-256 over `source:link-or-title`.
pub fn item_id(source_id: &str, link: &str, title: &str) -> String {
    let base = if link.trim().is_empty() { title } else { link }.trim();
    let digest = Sha256::digest(format!("{source_id}:{base}").as_bytes());
    let hex = format!("{digest:x}");
    hex[..12].to_string()
}

/// Build a digest item from a feed entry; `None` if it has no title and no link.
pub fn digest_item(entry: &RssEntry, feed: &SelectedFeed, fetched_at: DateTime<Utc>) -> Option<DigestItem> {
    let title = compact_text(&strip_html(&entry.title), TITLE_LIMIT);
    let link = entry.link.trim().to_string();
    if title.is_empty() && link.is_empty() {
        return None;
    }
    let body = if entry.description.trim().is_empty() {
        &entry.content
    } else {
        &entry.description
    };
    Some(DigestItem {
        id: item_id(&feed.source_id, &link, &title),
        summary: compact_text(&strip_html(body), SUMMARY_LIMIT),
        published: entry.timestamp().trim().to_string(),
        title,
        link,
        source_id: feed.source_id.clone(),
        source_name: feed.source_name.clone(),
        feed_name: feed.feed_name.clone(),
        feed_url: feed.feed_url.clone(),
        topic_tags: feed.topic_tags.clone(),
        fetched_at,
        ai_summary: None,
        ai_tags: Vec::new(),
    })
}

/// Turn per-feed fetch outcomes into the sampled item list and error log.
pub fn gather(
    fetched: Vec<(SelectedFeed, Result<Vec<RssEntry>>)>,
    max_items_per_feed: usize,
    max_items: usize,
    fetched_at: DateTime<Utc>,
) -> (Vec<DigestItem>, Vec<FeedError>) {
    let mut errors = Vec::new();
    let mut candidates = Vec::new();

    for (feed, outcome) in fetched {
        match outcome {
            Ok(entries) => candidates.extend(
                entries
                    .iter()
                    .take(max_items_per_feed)
                    .filter_map(|e| digest_item(e, &feed, fetched_at)),
            ),
            Err(e) => errors.push(FeedError {
                feed_url: Some(feed.feed_url.clone()),
                source_id: Some(feed.source_id.clone()),
                item_id: None,
                error: e.to_string(),
            }),
        }
    }

    let items = candidates
        .into_iter()
        .unique_by(|item| {
            if !item.link.is_empty() {
                item.link.clone()
            } else if !item.title.is_empty() {
                item.title.clone()
            } else {
                item.id.clone()
            }
        })
        .take(max_items)
        .collect();
    (items, errors)
}

/// Attach model summaries to `items`, one call each.
pub async fn apply_summaries<T>(
    client: &RetryFetch<T>,
    model: &str,
    items: &mut [DigestItem],
) -> (SummarizerReport, Vec<FeedError>)
where
    T: FetchAsync<Request = DigestItem, Response = ItemSummary>,
{
    let mut report = SummarizerReport {
        model: model.to_string(),
        ..Default::default()
    };
    let mut errors = Vec::new();

    for item in items.iter_mut() {
        report.requests += 1;
        match summarize_with_backoff(client, item).await {
            Ok(s) => {
                report.succeeded += 1;
                report.usage.add(&s.usage);
                if let Some(id) = s.response_id {
                    report.response_ids.push(id);
                }
                item.ai_summary = Some(s.summary);
                item.ai_tags = s.tags;
            }
            Err(e) => {
                report.failed += 1;
                warn!(item = %item.id, error = %e, "Skipping summary for item");
                errors.push(FeedError {
                    feed_url: Some(item.feed_url.clone()),
                    source_id: Some(item.source_id.clone()),
                    item_id: Some(item.id.clone()),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        requests = report.requests,
        succeeded = report.succeeded,
        failed = report.failed,
        total_tokens = report.usage.total_tokens,
        "Summarization finished"
    );
    (report, errors)
}

/// Run the whole digest job and return what was written.
///
/// # Arguments
///
/// * `http` - Shared client; feeds and the model API both go through it
/// * `opts` - Catalog, sampling limits, output paths and summarizer settings
///
/// # Returns
///
/// The digest exactly as written to `opts.output`. Failed feeds and failed
/// summaries are listed in its `errors`.
///
/// # Errors
///
/// No feeds selected, a missing OpenAI key when there are items to
/// summarize, or a failed write.
#[instrument(level = "info", skip_all, fields(catalog = %opts.catalog_path.display()))]
pub async fn run_digest(http: &Client, opts: &DigestOptions) -> Result<DigestSnapshot> {
    let catalog = load_catalog(&opts.catalog_path).await?;
    let feeds = select_feeds(&catalog, &opts.selection);
    if feeds.is_empty() {
        error!("No feeds selected; check catalog or filters");
        return Err(IngestError::Config(
            "no feeds selected; check catalog or filters".into(),
        ));
    }
    info!(feeds = feeds.len(), "Selected feeds");

    let generated_at = utc_now();
    let client = RetryFetch::new(FeedClient::new(http.clone()), opts.retry);
    let fetched = fetch_feeds(&client, feeds).await;

    let (mut items, mut errors) = gather(fetched, opts.max_items_per_feed, opts.max_items, generated_at);
    info!(items = items.len(), feed_errors = errors.len(), "Sampled digest items");

    let summarizer = if opts.skip_summary {
        info!("Summarization skipped");
        None
    } else if items.is_empty() {
        info!("No items to summarize");
        None
    } else {
        let settings = &opts.summarizer;
        let Some(api_key) = settings.api_key.clone() else {
            error!("OPENAI_API_KEY is not set; pass --skip-summary to write an unsummarized digest");
            return Err(IngestError::Config("OPENAI_API_KEY is not set".into()));
        };
        let client = RetryFetch::new(
            OpenAiSummarizer::new(http.clone(), settings.endpoint.clone(), api_key, settings.model.clone()),
            opts.retry,
        );
        let (report, item_errors) = apply_summaries(&client, client.inner().model(), &mut items).await;
        errors.extend(item_errors);
        Some(report)
    };

    let digest = DigestSnapshot {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at,
        catalog_path: opts.catalog_path.display().to_string(),
        request: DigestRequest {
            max_sources: opts.selection.max_sources,
            feeds_per_source: opts.selection.feeds_per_source,
            max_items_per_feed: opts.max_items_per_feed,
            max_items: opts.max_items,
            source_ids: opts.selection.source_ids.clone(),
        },
        summarizer,
        items,
        errors,
    };

    write_digest(&digest, &opts.output, opts.archive_dir.as_deref()).await?;
    info!(
        items = digest.items.len(),
        errors = digest.errors.len(),
        output = %opts.output.display(),
        "Wrote digest"
    );
    if !digest.errors.is_empty() {
        warn!(count = digest.errors.len(), "Digest run encountered errors");
    }
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::fast_policy;
    use crate::models::TokenUsage;
    use std::cell::RefCell;

    fn feed(source: &str) -> SelectedFeed {
        SelectedFeed {
            source_id: source.into(),
            source_name: source.to_uppercase(),
            country: None,
            language: None,
            feed_name: "Top".into(),
            feed_url: format!("https://{source}.example/rss"),
            topic_tags: vec!["news".into()],
        }
    }

    fn entry(title: &str, link: &str) -> RssEntry {
        RssEntry {
            title: title.into(),
            link: link.into(),
            description: "<p>Some   <i>body</i></p>".into(),
            published: "Mon, 01 Jan 2024 00:00:00 +0000".into(),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_746_563_400, 0).unwrap()
    }

    #[test]
    fn test_item_id_is_stable_and_short() {
        let a = item_id("npr", "https://npr.example/1", "Title");
        let b = item_id("npr", "https://npr.example/1", "Other title");
        let c = item_id("bbc", "https://npr.example/1", "Title");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(item_id("x", "", "T"), item_id("x", "  ", "T"));
    }

    #[test]
    fn test_digest_item_cleans_text() {
        let item = digest_item(&entry("  A   title ", "https://a.example/1"), &feed("a"), now()).unwrap();
        assert_eq!(item.title, "A title");
        assert_eq!(item.summary, "Some body");
        assert_eq!(item.source_name, "A");
        assert!(digest_item(&RssEntry::default(), &feed("a"), now()).is_none());
    }

    #[test]
    fn test_gather_caps_dedupes_and_records_errors() {
        let fetched = vec![
            (
                feed("a"),
                Ok(vec![
                    entry("One", "https://x.example/1"),
                    entry("Two", "https://x.example/2"),
                    entry("Three", "https://x.example/3"),
                ]),
            ),
            (
                feed("b"),
                Err(IngestError::Status {
                    status: 404,
                    message: "gone".into(),
                }),
            ),
            (
                feed("c"),
                Ok(vec![
                    entry("One again", "https://x.example/1"),
                    entry("Four", "https://x.example/4"),
                ]),
            ),
        ];
        let (items, errors) = gather(fetched, 2, 10, now());
        let links: Vec<_> = items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["https://x.example/1", "https://x.example/2", "https://x.example/4"]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source_id.as_deref(), Some("b"));
        assert!(errors[0].error.contains("404"));
    }

    #[test]
    fn test_gather_total_cap() {
        let fetched = vec![(
            feed("a"),
            Ok((0..10).map(|i| entry(&format!("T{i}"), &format!("https://a/{i}"))).collect()),
        )];
        let (items, _) = gather(fetched, 10, 4, now());
        assert_eq!(items.len(), 4);
    }

    struct ByTitle {
        calls: RefCell<usize>,
    }

    impl FetchAsync for ByTitle {
        type Request = DigestItem;
        type Response = ItemSummary;

        async fn fetch(&self, item: &DigestItem) -> Result<ItemSummary> {
            *self.calls.borrow_mut() += 1;
            if item.title.contains("fail") {
                return Err(IngestError::Api("refused".into()));
            }
            Ok(ItemSummary {
                summary: format!("About {}", item.title),
                tags: vec!["tag".into()],
                response_id: Some(format!("resp-{}", item.id)),
                usage: TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_per_item_failure_is_skipped() {
        let (mut items, _) = gather(
            vec![(
                feed("a"),
                Ok(vec![
                    entry("good one", "https://a/1"),
                    entry("will fail", "https://a/2"),
                    entry("good two", "https://a/3"),
                ]),
            )],
            5,
            5,
            now(),
        );
        let client = RetryFetch::new(ByTitle { calls: RefCell::new(0) }, fast_policy(2));
        let (report, errors) = apply_summaries(&client, "test-model", &mut items).await;

        assert_eq!(report.requests, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.usage.total_tokens, 10);
        assert_eq!(report.response_ids.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].item_id.as_deref(), Some(items[1].id.as_str()));

        assert_eq!(items[0].ai_summary.as_deref(), Some("About good one"));
        assert!(items[1].ai_summary.is_none());
        assert_eq!(items[2].ai_tags, vec!["tag"]);
        // Api errors are not retried.
        assert_eq!(*client.inner().calls.borrow(), 3);
    }

    #[tokio::test]
    async fn test_run_digest_without_feeds_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("rss_feeds.json");
        std::fs::write(&catalog, r#"{"sources": []}"#).unwrap();
        let opts = DigestOptions {
            catalog_path: catalog,
            selection: FeedSelection {
                max_sources: 10,
                feeds_per_source: 1,
                source_ids: vec![],
            },
            max_items_per_feed: 3,
            max_items: 30,
            output: dir.path().join("out.json"),
            archive_dir: None,
            skip_summary: true,
            summarizer: SummarizerSettings {
                endpoint: "http://127.0.0.1:9/unused".into(),
                api_key: None,
                model: "test-model".into(),
            },
            retry: fast_policy(0),
        };
        let err = run_digest(&Client::new(), &opts).await.unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(!dir.path().join("out.json").exists());
    }

    #[test]
    fn test_settings_debug_hides_key() {
        let settings = SummarizerSettings {
            endpoint: "https://api.example/v1".into(),
            api_key: Some("sk-secret".into()),
            model: "m".into(),
        };
        assert!(!format!("{settings:?}").contains("sk-secret"));
    }
}
