//! # Newswire Snapshot
//!
//! A small batch pipeline that collects news articles from the NewsData.io
//! API and from catalog RSS/Atom feeds, normalizes them into one article
//! schema, drops records already seen, and keeps everything in a single
//! JSON snapshot that is replaced atomically on every run.
//!
//! ## Features
//!
//! - Cursor pagination against NewsData.io with pacing, retries and `Retry-After`
//! - RSS 2.0 and Atom feeds listed in a JSON or YAML catalog
//! - Stable deduplication by provider id, else by link and publish time
//! - A daily digest of sampled feed items, each summarized by an
//!   OpenAI-compatible chat model, with a dated archive copy
//!
//! ## Usage
//!
//! ```sh
//! newswire fetch --max-pages 2
//! newswire rss --catalog feed_catalog/rss_feeds.json
//! newswire digest --max-items 20
//! newswire probe
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: API pages or catalog feeds ([`scrapers`])
//! 2. **Normalizing**: raw records to [`models::Article`] ([`normalize`])
//! 3. **Deduplicating**: against the snapshot and within the batch ([`dedupe`])
//! 4. **Persisting**: merge, run record, atomic replace ([`outputs::snapshot`])

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod catalog;
mod cli;
mod config;
mod dedupe;
mod digest;
mod error;
mod models;
mod normalize;
mod outputs;
mod pipeline;
mod scrapers;
mod summarize;
mod utils;

use cli::{Cli, Command, QueryArgs};
use config::{DEFAULT_OPENAI_MODEL, ENV_NEWSDATA_KEY, ENV_OPENAI_KEY, ENV_OPENAI_MODEL, default_env_files, resolve};
use digest::{DigestOptions, SummarizerSettings, run_digest};
use error::IngestError;
use pipeline::{FetchOptions, RssOptions, run_fetch, run_probe, run_rss};
use scrapers::http_client;
use utils::{ensure_writable_dir, parent_dir};

/// Fail early if the directory that will hold `output` is not writable.
async fn check_output(output: &Path) -> Result<(), Box<dyn Error>> {
    let dir = parent_dir(output);
    if let Err(e) = ensure_writable_dir(dir).await {
        error!(
            path = %dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }
    Ok(())
}

fn newsdata_key(args: &QueryArgs) -> Result<String, IngestError> {
    resolve(args.api_key.as_deref(), ENV_NEWSDATA_KEY, &default_env_files()).ok_or_else(|| {
        error!("{ENV_NEWSDATA_KEY} is not set (environment, .env, or RSS_Feeds/.env)");
        IngestError::Config(format!("missing {ENV_NEWSDATA_KEY}"))
    })
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("newswire starting up");

    let args = Cli::parse();
    debug!(?args.command, "Parsed CLI arguments");

    match args.command {
        Command::Fetch(args) => {
            check_output(&args.output).await?;
            let api_key = newsdata_key(&args.query)?;
            let http = http_client(args.http.timeout())?;
            let opts = FetchOptions {
                output: args.output,
                base_url: args.query.base_url.clone(),
                api_key,
                query: args.query.to_query(),
                start_page: args.start_page,
                max_pages: args.max_pages.max(1),
                request_interval: Duration::from_millis(args.request_interval_ms),
                max_articles: args.max_articles,
                retry: args.http.retry_policy(),
            };
            let summary = run_fetch(&http, &opts).await?;
            info!(
                added = summary.added,
                total = summary.total_articles,
                errors = summary.errors,
                "Fetch run complete"
            );
        }
        Command::Rss(args) => {
            check_output(&args.output).await?;
            let http = http_client(args.http.timeout())?;
            let opts = RssOptions {
                catalog_path: args.selection.catalog.clone(),
                selection: args.selection.to_selection(),
                output: args.output,
                max_articles: args.max_articles,
                retry: args.http.retry_policy(),
            };
            let summary = run_rss(&http, &opts).await?;
            info!(
                added = summary.added,
                total = summary.total_articles,
                failed_feeds = summary.errors,
                "RSS run complete"
            );
        }
        Command::Digest(args) => {
            check_output(&args.output).await?;
            let files = default_env_files();
            let http = http_client(args.http.timeout())?;
            let opts = DigestOptions {
                catalog_path: args.selection.catalog.clone(),
                selection: args.selection.to_selection(),
                max_items_per_feed: args.max_items_per_feed,
                max_items: args.max_items,
                output: args.output,
                archive_dir: (!args.no_archive).then_some(args.archive_dir),
                skip_summary: args.skip_summary,
                summarizer: SummarizerSettings {
                    endpoint: args.openai_endpoint,
                    api_key: resolve(args.openai_api_key.as_deref(), ENV_OPENAI_KEY, &files),
                    model: resolve(args.openai_model.as_deref(), ENV_OPENAI_MODEL, &files)
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                },
                retry: args.http.retry_policy(),
            };
            let digest = run_digest(&http, &opts).await?;
            info!(
                items = digest.items.len(),
                summarized = digest.summarizer.as_ref().map_or(0, |s| s.succeeded),
                errors = digest.errors.len(),
                "Digest run complete"
            );
        }
        Command::Probe(args) => {
            let api_key = newsdata_key(&args.query)?;
            let http = http_client(args.http.timeout())?;
            let report = run_probe(
                &http,
                &args.query.base_url,
                &api_key,
                args.query.to_query(),
                args.http.retry_policy(),
            )
            .await?;
            println!("{report}");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        "newswire finished"
    );

    Ok(())
}
