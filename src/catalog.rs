//! RSS feed catalog loading and feed selection.
//!
//! The catalog is a JSON (or YAML, picked by file extension) document:
//!
//! ```json
//! { "sources": [
//!     { "id": "npr", "name": "NPR", "country": "us", "language": "en",
//!       "feeds": [ { "name": "Top", "url": "https://feeds.npr.org/1001/rss.xml",
//!                    "topic_tags": ["general"] } ] } ] }
//! ```

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Catalog {
    #[serde(default)]
    pub sources: Vec<CatalogSource>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub feeds: Vec<CatalogFeed>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogFeed {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
}

/// A feed flattened together with the source it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFeed {
    pub source_id: String,
    pub source_name: String,
    pub country: Option<String>,
    pub language: Option<String>,
    pub feed_name: String,
    pub feed_url: String,
    pub topic_tags: Vec<String>,
}

/// Limits applied by [`select_feeds`].
#[derive(Debug, Clone, Default)]
pub struct FeedSelection {
    pub max_sources: usize,
    pub feeds_per_source: usize,
    /// Empty means "all sources".
    pub source_ids: Vec<String>,
}

impl Catalog {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Read a catalog from disk. Any failure is fatal for the run.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_catalog(path: &Path) -> Result<Catalog> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        IngestError::Config(format!("failed to load catalog {}: {e}", path.display()))
    })?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    let catalog = if is_yaml {
        Catalog::from_yaml(&text)?
    } else {
        Catalog::from_json(&text)?
    };
    info!(sources = catalog.sources.len(), "Loaded feed catalog");
    Ok(catalog)
}

/// Pick feeds in catalog order.
///
/// Sources not named in `source_ids` (when non-empty) are skipped and do not
/// count toward `max_sources`. Feeds without a URL are dropped.
pub fn select_feeds(catalog: &Catalog, selection: &FeedSelection) -> Vec<SelectedFeed> {
    catalog
        .sources
        .iter()
        .filter(|s| selection.source_ids.is_empty() || selection.source_ids.contains(&s.id))
        .take(selection.max_sources)
        .flat_map(|source| {
            source
                .feeds
                .iter()
                .take(selection.feeds_per_source)
                .filter(|f| !f.url.trim().is_empty())
                .map(move |feed| SelectedFeed {
                    source_id: source.id.clone(),
                    source_name: source.name.clone(),
                    country: source.country.clone(),
                    language: source.language.clone(),
                    feed_name: feed.name.clone(),
                    feed_url: feed.url.trim().to_string(),
                    topic_tags: feed.topic_tags.clone(),
                })
        })
        .collect()
}

/// Split a `a, b,,c` flag value into ids.
pub fn parse_source_ids(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
