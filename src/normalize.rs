//! Mapping of raw provider records into the canonical [`Article`].
//!
//! Both mappers are pure and total: missing optional fields become `None`
//! or empty collections, and a record that cannot be identified at all comes
//! back as a [`NormalizeError`] for the caller to count and skip. Nothing in
//! here panics on provider input.

use crate::catalog::SelectedFeed;
use crate::models::{AnalyticScores, Article, Provider};
use crate::scrapers::rss::RssEntry;
use crate::utils::{compact_text, parse_timestamp, slugify, strip_html, truncate_for_log};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const TITLE_LIMIT: usize = 300;
const DESCRIPTION_LIMIT: usize = 2000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record is not a JSON object (found {0})")]
    NotAnObject(&'static str),
    #[error("record has neither a link nor a title")]
    Unidentifiable,
}

/// Articles that made it through plus how many records were dropped.
#[derive(Debug, Default)]
pub struct Normalized {
    pub articles: Vec<Article>,
    pub skipped: usize,
}

impl Normalized {
    fn push(&mut self, outcome: Result<Article, NormalizeError>, preview: impl FnOnce() -> String) {
        match outcome {
            Ok(article) => self.articles.push(article),
            Err(e) => {
                self.skipped += 1;
                warn!(error = %e, record = %preview(), "Skipping malformed record");
            }
        }
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts a JSON array of strings or a single (comma separated) string.
fn text_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    let parts: Vec<String> = match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    parts
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn tag_set<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn link_host(link: Option<&str>) -> Option<String> {
    let host = Url::parse(link?).ok()?.host_str()?.trim_start_matches("www.").to_string();
    (!host.is_empty()).then_some(host)
}

/// `<provider>:<slug>` from the first candidate that slugifies to something.
pub fn derive_source_id(provider: Provider, candidates: &[Option<&str>]) -> String {
    let slug = candidates
        .iter()
        .flatten()
        .map(|c| slugify(c))
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}:{}", provider.as_str(), slug)
}

fn clean_description(raw: Option<&str>) -> Option<String> {
    let text = compact_text(&strip_html(raw?), DESCRIPTION_LIMIT);
    (!text.is_empty()).then_some(text)
}

fn clean_title(raw: Option<&str>) -> Option<String> {
    let text = compact_text(raw?, TITLE_LIMIT);
    (!text.is_empty()).then_some(text)
}

/// Map one NewsData `results[]` element.
pub fn from_newsdata(raw: &Value, fetched_at: DateTime<Utc>) -> Result<Article, NormalizeError> {
    let obj = match raw {
        Value::Object(obj) => obj,
        Value::Null => return Err(NormalizeError::NotAnObject("null")),
        Value::Array(_) => return Err(NormalizeError::NotAnObject("array")),
        _ => return Err(NormalizeError::NotAnObject("scalar")),
    };

    let link = text(obj, "link");
    let title = clean_title(text(obj, "title").as_deref());
    if link.is_none() && title.is_none() {
        return Err(NormalizeError::Unidentifiable);
    }

    let source_key = text(obj, "source_id");
    let source_name = text(obj, "source_name");
    let host = link_host(link.as_deref());
    let source_id = derive_source_id(
        Provider::Newsdata,
        &[source_key.as_deref(), source_name.as_deref(), host.as_deref()],
    );

    let published_at = text(obj, "pubDate")
        .or_else(|| text(obj, "published_at"))
        .as_deref()
        .and_then(parse_timestamp);

    let description = clean_description(
        text(obj, "description")
            .or_else(|| text(obj, "content"))
            .as_deref(),
    );

    Ok(Article {
        id: text(obj, "article_id").map(|id| format!("{}:{id}", Provider::Newsdata)),
        provider: Provider::Newsdata,
        source_id,
        source_name,
        source_url: text(obj, "source_url"),
        link,
        country: text_list(obj, "country"),
        language: text(obj, "language"),
        category: tag_set(text_list(obj, "category")),
        published_at,
        title,
        description,
        fetched_at,
        analytics: AnalyticScores::default(),
        raw: raw.clone(),
    })
}

/// Map one feed entry, using the catalog entry for source metadata.
pub fn from_rss(
    entry: &RssEntry,
    feed: &SelectedFeed,
    fetched_at: DateTime<Utc>,
) -> Result<Article, NormalizeError> {
    let link = Some(entry.link.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string);
    let title = clean_title(Some(strip_html(&entry.title).as_str()));
    if link.is_none() && title.is_none() {
        return Err(NormalizeError::Unidentifiable);
    }

    let host = link_host(link.as_deref());
    let source_id = derive_source_id(
        Provider::Rss,
        &[
            Some(feed.source_id.as_str()),
            Some(feed.source_name.as_str()),
            host.as_deref(),
        ],
    );
    let slug = source_id.trim_start_matches("rss:");
    let id = Some(entry.guid.trim())
        .filter(|g| !g.is_empty())
        .map(|guid| format!("{}:{slug}:{guid}", Provider::Rss));

    let body = if entry.description.trim().is_empty() {
        entry.content.as_str()
    } else {
        entry.description.as_str()
    };

    Ok(Article {
        id,
        provider: Provider::Rss,
        source_id,
        source_name: Some(feed.source_name.clone()).filter(|s| !s.trim().is_empty()),
        source_url: Some(feed.feed_url.clone()),
        link,
        country: feed.country.iter().cloned().collect(),
        language: feed.language.clone(),
        category: tag_set(feed.topic_tags.iter().chain(entry.categories.iter())),
        published_at: parse_timestamp(entry.timestamp()),
        title,
        description: clean_description(Some(body)),
        fetched_at,
        analytics: AnalyticScores::default(),
        raw: serde_json::to_value(entry).unwrap_or_default(),
    })
}

/// Normalize a NewsData batch, skipping and counting bad records.
pub fn normalize_newsdata<'a, I>(records: I, fetched_at: DateTime<Utc>) -> Normalized
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut out = Normalized::default();
    for raw in records {
        out.push(from_newsdata(raw, fetched_at), || {
            truncate_for_log(&raw.to_string(), 200)
        });
    }
    debug!(ok = out.articles.len(), skipped = out.skipped, "Normalized NewsData batch");
    out
}

/// Normalize the entries of one feed, skipping and counting bad entries.
pub fn normalize_rss(entries: &[RssEntry], feed: &SelectedFeed, fetched_at: DateTime<Utc>) -> Normalized {
    let mut out = Normalized::default();
    for entry in entries {
        out.push(from_rss(entry, feed, fetched_at), || {
            format!("{} entry {:?}", feed.feed_url, truncate_for_log(&entry.guid, 80))
        });
    }
    debug!(
        feed = %feed.feed_url,
        ok = out.articles.len(),
        skipped = out.skipped,
        "Normalized feed entries"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::format_utc;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_717_000_000, 0).unwrap()
    }

    fn feed() -> SelectedFeed {
        SelectedFeed {
            source_id: "npr".into(),
            source_name: "NPR".into(),
            country: Some("us".into()),
            language: Some("en".into()),
            feed_name: "Top".into(),
            feed_url: "https://feeds.npr.example/top.xml".into(),
            topic_tags: vec!["General".into()],
        }
    }

    #[test]
    fn test_minimal_newsdata_record() {
        let raw = json!({
            "article_id": "abc",
            "title": "X",
            "link": "http://a",
            "pubDate": "2024-01-01T00:00:00Z"
        });
        let article = from_newsdata(&raw, now()).unwrap();
        assert_eq!(article.source_id, "newsdata:a");
        assert_eq!(article.id.as_deref(), Some("newsdata:abc"));
        assert_eq!(
            article.published_at.map(|t| format_utc(&t)).as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert!(article.analytics.is_unknown());
        assert_eq!(article.raw, raw);

        let v = serde_json::to_value(&article).unwrap();
        assert_eq!(v["published_at"], "2024-01-01T00:00:00Z");
        assert!(v["analytics"].as_object().unwrap().values().all(Value::is_null));
    }

    #[test]
    fn test_missing_optional_fields_become_null() {
        let raw = json!({"link": "https://www.example.org/story"});
        let article = from_newsdata(&raw, now()).unwrap();
        assert_eq!(article.source_id, "newsdata:example-org");
        assert!(article.id.is_none());
        assert!(article.title.is_none());
        assert!(article.description.is_none());
        assert!(article.language.is_none());
        assert!(article.source_name.is_none());
        assert!(article.published_at.is_none());
        assert!(article.country.is_empty());
        assert!(article.category.is_empty());
    }

    #[test]
    fn test_full_newsdata_record() {
        let raw = json!({
            "article_id": "f00",
            "title": "  Markets   rally  ",
            "link": "https://news.example/m",
            "description": "<p>Stocks &amp; bonds</p>",
            "pubDate": "2024-03-05 10:11:12",
            "source_id": "Example_News",
            "source_name": "Example News",
            "source_url": "https://news.example",
            "country": ["united states of america"],
            "category": ["Business", "top", "business"],
            "language": "english"
        });
        let a = from_newsdata(&raw, now()).unwrap();
        assert_eq!(a.title.as_deref(), Some("Markets rally"));
        assert_eq!(a.description.as_deref(), Some("Stocks & bonds"));
        assert_eq!(a.source_id, "newsdata:example-news");
        assert_eq!(format_utc(&a.published_at.unwrap()), "2024-03-05T10:11:12Z");
        assert_eq!(
            a.category.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["business", "top"]
        );
        assert_eq!(a.country, vec!["united states of america"]);
    }

    #[test]
    fn test_wrong_typed_fields_are_ignored() {
        let raw = json!({"title": "T", "link": 42, "category": {"x": 1}, "pubDate": false});
        let a = from_newsdata(&raw, now()).unwrap();
        assert_eq!(a.link.as_deref(), Some("42"));
        assert!(a.category.is_empty());
        assert!(a.published_at.is_none());
        assert_eq!(a.source_id, "newsdata:unknown");
    }

    #[test]
    fn test_malformed_records_are_counted_not_fatal() {
        let batch = vec![
            json!({"title": "ok", "link": "https://x.example/1"}),
            json!("just a string"),
            json!({"description": "no identity"}),
            Value::Null,
            json!({"title": "also ok"}),
        ];
        let out = normalize_newsdata(batch.iter(), now());
        assert_eq!(out.articles.len(), 2);
        assert_eq!(out.skipped, 3);
    }

    #[test]
    fn test_errors_describe_the_problem() {
        assert_eq!(
            from_newsdata(&json!([1, 2]), now()).unwrap_err(),
            NormalizeError::NotAnObject("array")
        );
        assert_eq!(
            from_newsdata(&json!({"title": "   "}), now()).unwrap_err(),
            NormalizeError::Unidentifiable
        );
    }

    #[test]
    fn test_rss_entry_mapping() {
        let entry = RssEntry {
            title: "Budget passes".into(),
            link: "https://npr.example/budget".into(),
            description: "<p>The <b>House</b> voted.</p>".into(),
            published: "Tue, 02 Jan 2024 15:04:05 GMT".into(),
            guid: "budget-1".into(),
            categories: vec!["Politics".into()],
            ..Default::default()
        };
        let a = from_rss(&entry, &feed(), now()).unwrap();
        assert_eq!(a.provider, Provider::Rss);
        assert_eq!(a.source_id, "rss:npr");
        assert_eq!(a.id.as_deref(), Some("rss:npr:budget-1"));
        assert_eq!(a.description.as_deref(), Some("The House voted."));
        assert_eq!(format_utc(&a.published_at.unwrap()), "2024-01-02T15:04:05Z");
        assert!(a.category.contains("general"));
        assert!(a.category.contains("politics"));
        assert_eq!(a.country, vec!["us"]);
        assert_eq!(a.source_url.as_deref(), Some("https://feeds.npr.example/top.xml"));
        assert_eq!(a.raw["guid"], "budget-1");
    }

    #[test]
    fn test_rss_entry_falls_back_to_content_and_updated() {
        let entry = RssEntry {
            link: "https://npr.example/x".into(),
            content: "Body text".into(),
            updated: "2024-02-03T04:05:06Z".into(),
            ..Default::default()
        };
        let a = from_rss(&entry, &feed(), now()).unwrap();
        assert!(a.id.is_none());
        assert!(a.title.is_none());
        assert_eq!(a.description.as_deref(), Some("Body text"));
        assert!(a.published_at.is_some());
    }

    #[test]
    fn test_rss_batch_skips_empty_entries() {
        let entries = vec![
            RssEntry {
                title: "Kept".into(),
                ..Default::default()
            },
            RssEntry::default(),
        ];
        let out = normalize_rss(&entries, &feed(), now());
        assert_eq!(out.articles.len(), 1);
        assert_eq!(out.skipped, 1);
    }
}
