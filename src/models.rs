//! Data models for canonical articles and the snapshot files.
//!
//! - [`Article`]: the unified record every source is normalized into
//! - [`AnalyticScores`]: fixed set of content scores, all unknown for now
//! - [`Snapshot`] / [`RunRecord`]: the persisted article set and its run log
//! - [`DigestSnapshot`] / [`DigestItem`]: output of the summarization job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub const SCHEMA_VERSION: &str = "1.0";

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Newsdata,
    Rss,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Newsdata => "newsdata",
            Provider::Rss => "rss",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content scores filled in by a later analysis stage.
///
/// Every key is always serialized; an unknown score is `null`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AnalyticScores {
    pub bias: Option<f64>,
    pub factuality: Option<f64>,
    pub subjectivity: Option<f64>,
    pub sensationalism: Option<f64>,
    pub clickbait: Option<f64>,
    pub polarization: Option<f64>,
    pub civility: Option<f64>,
    pub toxicity: Option<f64>,
}

impl AnalyticScores {
    pub fn is_unknown(&self) -> bool {
        *self == AnalyticScores::default()
    }
}

/// One normalized news item.
///
/// Identity is `id` when the provider supplied one, otherwise
/// (`link`, `published_at`), and for link-less records
/// (`title`, `published_at`, `source_id`). See [`crate::dedupe::ArticleKey`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    /// Provider-assigned identifier, namespaced as `<provider>:<value>`.
    #[serde(default)]
    pub id: Option<String>,
    pub provider: Provider,
    /// `<provider>:<slug>`
    pub source_id: String,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub country: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub category: BTreeSet<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub analytics: AnalyticScores,
    /// Original provider payload, untouched.
    #[serde(default)]
    pub raw: Value,
}

/// One ingestion run, appended to [`Snapshot::requests`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunRecord {
    pub fetched_at: Option<DateTime<Utc>>,
    pub provider: Option<Provider>,
    /// Request parameters or feed selection. Never contains secrets.
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub pages: usize,
    #[serde(default)]
    pub results_count: usize,
    #[serde(default)]
    pub normalized: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub duplicates: usize,
    #[serde(default)]
    pub added: usize,
    #[serde(default)]
    pub evicted: usize,
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FeedError>,
}

/// The persisted article set read by the downstream application.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub requests: Vec<RunRecord>,
}

fn schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            schema_version: schema_version(),
            updated_at: None,
            articles: Vec::new(),
            requests: Vec::new(),
        }
    }
}

/// A feed (or item) that failed during a run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub error: String,
}

/// One RSS item in the daily digest.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DigestItem {
    pub id: String,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: String,
    pub source_id: String,
    pub source_name: String,
    pub feed_name: String,
    pub feed_url: String,
    pub topic_tags: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_tags: Vec<String>,
}

/// Selection parameters echoed into the digest output.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DigestRequest {
    pub max_sources: usize,
    pub feeds_per_source: usize,
    pub max_items_per_feed: usize,
    pub max_items: usize,
    pub source_ids: Vec<String>,
}

/// Token accounting summed over all summarization calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Summary of the summarizer's work for one digest run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SummarizerReport {
    pub model: String,
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub response_ids: Vec<String>,
    pub usage: TokenUsage,
}

/// The digest file written by the summarization job.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DigestSnapshot {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub catalog_path: String,
    pub request: DigestRequest,
    pub summarizer: Option<SummarizerReport>,
    pub items: Vec<DigestItem>,
    pub errors: Vec<FeedError>,
}
