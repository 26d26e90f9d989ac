//! Command-line interface definitions for Newswire Snapshot.
//!
//! One binary, one subcommand per pipeline. Secrets can be given as flags,
//! environment variables, or a `.env` file (see [`crate::config`]).

use crate::api::RetryPolicy;
use crate::catalog::{FeedSelection, parse_source_ids};
use crate::scrapers::newsdata::{NEWSDATA_BASE_URL, NewsDataQuery};
use crate::summarize::OPENAI_ENDPOINT;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SNAPSHOT: &str = "data/newsdata_dump.json";
pub const DEFAULT_CATALOG: &str = "feed_catalog/rss_feeds.json";
pub const DEFAULT_DIGEST: &str = "data/rss_openai_daily.json";
pub const DEFAULT_ARCHIVE_DIR: &str = "data/history";

/// Collect news articles into a deduplicated JSON snapshot.
///
/// # Examples
///
/// ```sh
/// # Two pages of US top stories into the default snapshot
/// newswire fetch --max-pages 2
///
/// # Catalog feeds into the same snapshot, capped at 5000 articles
/// newswire rss --max-sources 20 --max-articles 5000
///
/// # Daily digest without calling the model
/// newswire digest --skip-summary --no-archive
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Page through NewsData.io and merge the results into the snapshot
    Fetch(FetchArgs),
    /// Read catalog RSS/Atom feeds and merge their entries into the snapshot
    Rss(RssArgs),
    /// Sample catalog feeds, summarize each item, write a dated digest
    Digest(DigestArgs),
    /// Send one size-1 NewsData request and print a one-line report
    Probe(ProbeArgs),
}

/// Network settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Retries for transient failures (timeouts, 5xx, 429)
    #[arg(long, default_value_t = 5)]
    pub max_retries: usize,
}

impl HttpArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

/// NewsData query parameters.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Keyword query (`q` parameter)
    #[arg(long)]
    pub query: Option<String>,

    #[arg(long, default_value = "top")]
    pub category: String,

    #[arg(long, default_value = "us")]
    pub country: String,

    #[arg(long, default_value = "en")]
    pub language: String,

    /// Records per page
    #[arg(long, default_value_t = 10)]
    pub size: u32,

    /// NewsData API key
    #[arg(long, env = "NEWSDATA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value = NEWSDATA_BASE_URL, hide = true)]
    pub base_url: String,
}

impl QueryArgs {
    pub fn to_query(&self) -> NewsDataQuery {
        NewsDataQuery {
            query: self.query.clone(),
            category: self.category.clone(),
            country: self.country.clone(),
            language: self.language.clone(),
            size: self.size,
        }
    }
}

/// Catalog feed selection.
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Path to the feed catalog (JSON, or YAML by extension)
    #[arg(long, default_value = DEFAULT_CATALOG)]
    pub catalog: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub max_sources: usize,

    #[arg(long, default_value_t = 1)]
    pub feeds_per_source: usize,

    /// Comma-separated source ids to include
    #[arg(long)]
    pub source_ids: Option<String>,
}

impl SelectionArgs {
    pub fn to_selection(&self) -> FeedSelection {
        FeedSelection {
            max_sources: self.max_sources,
            feeds_per_source: self.feeds_per_source,
            source_ids: parse_source_ids(self.source_ids.as_deref()),
        }
    }
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Cursor (`nextPage`) to resume from
    #[arg(long)]
    pub start_page: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub max_pages: usize,

    /// Pause between page requests
    #[arg(long, default_value_t = 1000)]
    pub request_interval_ms: u64,

    /// Snapshot file
    #[arg(short, long, default_value = DEFAULT_SNAPSHOT)]
    pub output: PathBuf,

    /// Keep only the newest N articles
    #[arg(long)]
    pub max_articles: Option<usize>,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Args, Debug)]
pub struct RssArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Snapshot file
    #[arg(short, long, default_value = DEFAULT_SNAPSHOT)]
    pub output: PathBuf,

    /// Keep only the newest N articles
    #[arg(long)]
    pub max_articles: Option<usize>,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Args, Debug)]
pub struct DigestArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[arg(long, default_value_t = 3)]
    pub max_items_per_feed: usize,

    #[arg(long, default_value_t = 30)]
    pub max_items: usize,

    /// Digest file
    #[arg(short, long, default_value = DEFAULT_DIGEST)]
    pub output: PathBuf,

    #[arg(long, default_value = DEFAULT_ARCHIVE_DIR)]
    pub archive_dir: PathBuf,

    /// Do not write the dated archive copy
    #[arg(long)]
    pub no_archive: bool,

    /// Write the digest without calling the model
    #[arg(long)]
    pub skip_summary: bool,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Model name (falls back to OPENAI_MODEL, then gpt-4o-mini)
    #[arg(long, env = "OPENAI_MODEL")]
    pub openai_model: Option<String>,

    #[arg(long, default_value = OPENAI_ENDPOINT, hide = true)]
    pub openai_endpoint: String,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_defaults() {
        let cli = Cli::parse_from(["newswire", "fetch"]);
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.output, PathBuf::from(DEFAULT_SNAPSHOT));
        assert_eq!(args.max_pages, 1);
        assert_eq!(args.request_interval_ms, 1000);
        assert_eq!(args.max_articles, None);
        let q = args.query.to_query();
        assert_eq!((q.category.as_str(), q.country.as_str(), q.language.as_str()), ("top", "us", "en"));
        assert_eq!(args.query.base_url, NEWSDATA_BASE_URL);
        assert_eq!(args.http.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_fetch_flags() {
        let cli = Cli::parse_from([
            "newswire",
            "fetch",
            "--query",
            "climate",
            "--max-pages",
            "3",
            "--start-page",
            "abc123",
            "--max-articles",
            "500",
            "-o",
            "/tmp/dump.json",
            "--max-retries",
            "2",
        ]);
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.query.query.as_deref(), Some("climate"));
        assert_eq!(args.max_pages, 3);
        assert_eq!(args.start_page.as_deref(), Some("abc123"));
        assert_eq!(args.max_articles, Some(500));
        assert_eq!(args.output, PathBuf::from("/tmp/dump.json"));
        assert_eq!(args.http.retry_policy().max_retries, 2);
    }

    #[test]
    fn test_digest_flags() {
        let cli = Cli::parse_from([
            "newswire",
            "digest",
            "--source-ids",
            "npr, bbc",
            "--max-items",
            "5",
            "--skip-summary",
            "--no-archive",
        ]);
        let Command::Digest(args) = cli.command else {
            panic!("expected digest");
        };
        assert!(args.skip_summary);
        assert!(args.no_archive);
        assert_eq!(args.max_items, 5);
        assert_eq!(args.max_items_per_feed, 3);
        assert_eq!(args.selection.catalog, PathBuf::from(DEFAULT_CATALOG));
        assert_eq!(args.selection.to_selection().source_ids, vec!["npr", "bbc"]);
        assert_eq!(args.archive_dir, PathBuf::from(DEFAULT_ARCHIVE_DIR));
    }

    #[test]
    fn test_rss_and_probe_parse() {
        let cli = Cli::parse_from(["newswire", "rss", "--catalog", "feeds.yaml", "--max-sources", "2"]);
        let Command::Rss(args) = cli.command else {
            panic!("expected rss");
        };
        assert_eq!(args.selection.catalog, PathBuf::from("feeds.yaml"));
        assert_eq!(args.selection.to_selection().max_sources, 2);

        let cli = Cli::parse_from(["newswire", "probe", "--country", "gb"]);
        assert!(matches!(cli.command, Command::Probe(ref p) if p.query.country == "gb"));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["newswire", "publish"]).is_err());
    }
}
