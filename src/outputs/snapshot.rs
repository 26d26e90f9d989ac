//! The canonical article snapshot: load, merge, save.
//!
//! A run loads the current snapshot, merges the deduplicated batch onto the
//! end of it, appends a [`RunRecord`], and writes the whole file back with
//! [`write_json_atomic`]. There is no update-in-place of existing articles.

use crate::dedupe::dedupe;
use crate::error::{IngestError, Result};
use crate::models::{Article, RunRecord, Snapshot};
use crate::normalize::from_newsdata;
use crate::outputs::json::write_json_atomic;
use crate::utils::{parse_timestamp, utc_now};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// A snapshot as read from disk, with what had to be repaired on the way.
#[derive(Debug, Default)]
pub struct LoadedSnapshot {
    pub snapshot: Snapshot,
    /// Raw NewsData items from older dumps, normalized on load.
    pub upgraded: usize,
    /// Entries that could not be read as an article in any form.
    pub dropped: usize,
}

/// File layout with every list left undecoded, so entries can be read one
/// at a time.
#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    schema_version: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    articles: Value,
    #[serde(default)]
    requests: Value,
}

fn entries(value: Value, field: &str) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        _ => {
            warn!(field, "Snapshot field is not a list; treating as empty");
            Vec::new()
        }
    }
}

/// Read one stored entry.
///
/// Entries carrying a `provider` are canonical articles. Anything else is
/// taken to be a raw NewsData item written by an older dump and normalized,
/// keeping its own `fetched_at` when it has one.
fn decode_article(value: Value, loaded_at: DateTime<Utc>) -> Option<(Article, bool)> {
    if value.get("provider").is_some() {
        return match serde_json::from_value(value) {
            Ok(article) => Some((article, false)),
            Err(e) => {
                debug!(error = %e, "Dropping undecodable article");
                None
            }
        };
    }
    let fetched_at = value
        .get("fetched_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(loaded_at);
    match from_newsdata(&value, fetched_at) {
        Ok(article) => Some((article, true)),
        Err(e) => {
            debug!(error = %e, "Dropping unreadable legacy item");
            None
        }
    }
}

/// Decode snapshot text.
///
/// Empty input is an empty snapshot, and a bare array is read as the
/// article list. Entries are decoded one by one; see [`decode_article`].
/// Only text that is not JSON, or JSON that is neither an object nor an
/// array, is an error.
pub fn parse_snapshot(text: &str, loaded_at: DateTime<Utc>) -> std::result::Result<LoadedSnapshot, String> {
    if text.trim().is_empty() {
        return Ok(LoadedSnapshot::default());
    }
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let file = match value {
        Value::Array(_) => SnapshotFile {
            schema_version: None,
            updated_at: None,
            articles: value,
            requests: Value::Null,
        },
        Value::Object(_) => serde_json::from_value(value).map_err(|e| e.to_string())?,
        _ => return Err("unexpected JSON format (expected an object or an array)".to_string()),
    };

    let mut loaded = LoadedSnapshot::default();
    for item in entries(file.articles, "articles") {
        match decode_article(item, loaded_at) {
            Some((article, upgraded)) => {
                loaded.upgraded += usize::from(upgraded);
                loaded.snapshot.articles.push(article);
            }
            None => loaded.dropped += 1,
        }
    }
    loaded.snapshot.requests = entries(file.requests, "requests")
        .into_iter()
        .filter_map(|r| serde_json::from_value::<RunRecord>(r).ok())
        .collect();
    loaded.snapshot.updated_at = file.updated_at;
    if let Some(version) = file.schema_version {
        loaded.snapshot.schema_version = version;
    }
    Ok(loaded)
}

/// Load the snapshot at `path`, or an empty one when the file does not exist.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No snapshot yet; starting empty");
            return Ok(Snapshot::default());
        }
        Err(e) => {
            return Err(IngestError::Persist {
                path: path.display().to_string(),
                message: format!("failed to read: {e}"),
            });
        }
    };
    let loaded = parse_snapshot(&text, utc_now()).map_err(|message| IngestError::Persist {
        path: path.display().to_string(),
        message: format!("failed to parse: {message}"),
    })?;
    if loaded.upgraded > 0 {
        info!(count = loaded.upgraded, "Normalized raw items from an older dump");
    }
    if loaded.dropped > 0 {
        warn!(count = loaded.dropped, "Dropped unreadable snapshot entries");
    }
    let snapshot = loaded.snapshot;
    info!(
        articles = snapshot.articles.len(),
        runs = snapshot.requests.len(),
        "Loaded snapshot"
    );
    Ok(snapshot)
}

/// Counts produced by [`merge`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub duplicates: usize,
    pub evicted: usize,
}

/// Append the unseen records of `batch`, then apply the retention cap.
///
/// # Arguments
///
/// * `snapshot` - Current article set, extended in place
/// * `batch` - Newly normalized articles, in fetch order
/// * `max_articles` - With `Some(n)`, only the newest `n` entries by
///   insertion order are kept
///
/// # Returns
///
/// How many records were added, dropped as duplicates, and evicted by the
/// cap.
pub fn merge(snapshot: &mut Snapshot, batch: Vec<Article>, max_articles: Option<usize>) -> MergeStats {
    let deduped = dedupe(&snapshot.articles, batch);
    let added = deduped.fresh.len();
    snapshot.articles.extend(deduped.fresh);

    let evicted = match max_articles {
        Some(cap) if snapshot.articles.len() > cap => {
            let excess = snapshot.articles.len() - cap;
            snapshot.articles.drain(..excess);
            warn!(evicted = excess, cap, "Retention cap reached; dropped oldest articles");
            excess
        }
        _ => 0,
    };

    MergeStats {
        added,
        duplicates: deduped.duplicates,
        evicted,
    }
}

/// Log a run and bump `updated_at`.
pub fn record_run(snapshot: &mut Snapshot, run: RunRecord, at: DateTime<Utc>) {
    snapshot.updated_at = Some(at);
    snapshot.requests.push(run);
}

pub async fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<()> {
    write_json_atomic(snapshot, path).await
}
