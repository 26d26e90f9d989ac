//! RSS 2.0 and Atom feed fetching and parsing.
//!
//! Feeds are read with the `quick-xml` event reader. Both `<item>` (RSS) and
//! `<entry>` (Atom) elements become an [`RssEntry`]; channel-level metadata
//! comes from the catalog instead of the feed.

use crate::api::{FetchAsync, check_status};
use crate::catalog::SelectedFeed;
use crate::error::{IngestError, Result};
use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// One feed entry, fields exactly as the feed had them (trimmed).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RssEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub published: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub guid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl RssEntry {
    /// `published`, falling back to `updated`.
    pub fn timestamp(&self) -> &str {
        if self.published.is_empty() {
            &self.updated
        } else {
            &self.published
        }
    }

    fn set(&mut self, field: &str, text: String) {
        match field {
            "title" => self.title = text,
            "link" => {
                if self.link.is_empty() {
                    self.link = text;
                }
            }
            "description" | "summary" => self.description = text,
            "content:encoded" | "content" => self.content = text,
            "pubDate" | "published" | "dc:date" => self.published = text,
            "updated" => self.updated = text,
            "guid" | "id" => self.guid = text,
            "author" | "dc:creator" | "name" => {
                if self.author.is_empty() {
                    self.author = text;
                }
            }
            "category" => {
                if !text.is_empty() {
                    self.categories.push(text);
                }
            }
            _ => {}
        }
    }
}

fn qname(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| {
            let raw = String::from_utf8_lossy(&a.value).into_owned();
            unescape(&raw).map(|s| s.into_owned()).unwrap_or(raw)
        })
}

/// Atom links: take `href` of the alternate (or rel-less) link.
fn atom_link(e: &BytesStart<'_>) -> Option<String> {
    let rel = attr(e, "rel");
    if rel.as_deref().is_some_and(|r| r != "alternate") {
        return None;
    }
    attr(e, "href").filter(|h| !h.trim().is_empty())
}

/// Resolve `&name;` and `&#NN;` references split out by the reader.
fn resolve_reference(name: &str) -> String {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse::<u32>().ok(),
        };
        if let Some(ch) = code.and_then(char::from_u32) {
            return ch.to_string();
        }
    } else if let Some(s) = resolve_predefined_entity(name) {
        return s.to_string();
    }
    format!("&{name};")
}

/// Parse a feed document into entries, in document order.
///
/// Entries with neither a title nor a link are still returned; the
/// normalizer decides whether they are usable.
pub fn parse_feed(xml: &str) -> Result<Vec<RssEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<RssEntry> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = qname(&e);
                match name.as_str() {
                    "item" | "entry" => {
                        current = Some(RssEntry::default());
                        field = None;
                    }
                    _ if current.is_some() => {
                        if let Some(entry) = current.as_mut() {
                            if name == "link" {
                                if let Some(href) = atom_link(&e) {
                                    entry.set("link", href);
                                }
                            } else if name == "category" {
                                if let Some(term) = attr(&e, "term") {
                                    entry.set("category", term);
                                    field = None;
                                    continue;
                                }
                            }
                        }
                        field = Some(name);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    match qname(&e).as_str() {
                        "link" => {
                            if let Some(href) = atom_link(&e) {
                                entry.set("link", href);
                            }
                        }
                        "category" => {
                            if let Some(term) = attr(&e, "term") {
                                entry.set("category", term);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let raw = String::from_utf8_lossy(&e).into_owned();
                    match unescape(&raw) {
                        Ok(s) => text.push_str(&s),
                        Err(_) => text.push_str(&raw),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if field.is_some() {
                    let name = String::from_utf8_lossy(&e).into_owned();
                    text.push_str(&resolve_reference(&name));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "item" || name == "entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    field = None;
                } else if field.as_deref() == Some(name.as_str()) {
                    if let Some(entry) = current.as_mut() {
                        entry.set(&name, text.trim().to_string());
                    }
                    field = None;
                    text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) if !entries.is_empty() => {
                warn!(
                    recovered = entries.len(),
                    position = reader.buffer_position(),
                    error = %e,
                    "Feed is malformed past this point; keeping entries read so far"
                );
                break;
            }
            Err(e) => {
                return Err(IngestError::Xml(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(entries)
}

/// Download a feed and parse its entries.
///
/// A document that fails to parse is an error only when no entry was
/// recovered before the failure point.
#[instrument(level = "info", skip_all, fields(feed = %feed.feed_url))]
pub async fn fetch_feed(http: &Client, feed: &SelectedFeed) -> Result<Vec<RssEntry>> {
    let response = http.get(&feed.feed_url).send().await?;
    let response = check_status(response).await?;
    let body = response.text().await?;
    debug!(bytes = body.len(), "Downloaded feed");
    let entries = parse_feed(&body)?;
    info!(
        source = %feed.source_id,
        entries = entries.len(),
        "Parsed feed"
    );
    Ok(entries)
}

/// Single-attempt feed download, for use behind
/// [`RetryFetch`](crate::api::RetryFetch).
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: Client,
}

impl FeedClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

impl FetchAsync for FeedClient {
    type Request = SelectedFeed;
    type Response = Vec<RssEntry>;

    async fn fetch(&self, feed: &SelectedFeed) -> Result<Vec<RssEntry>> {
        fetch_feed(&self.http, feed).await
    }
}

/// Fetch every feed in order, pairing each with its outcome.
///
/// # Arguments
///
/// * `fetcher` - Feed source, normally a [`FeedClient`] wrapped in `RetryFetch`
/// * `feeds` - Feeds in the order they should be requested
///
/// # Returns
///
/// One `(feed, outcome)` pair per input feed. A failing feed is logged and
/// reported in its pair; it never stops the loop.
pub async fn fetch_feeds<F>(fetcher: &F, feeds: Vec<SelectedFeed>) -> Vec<(SelectedFeed, Result<Vec<RssEntry>>)>
where
    F: FetchAsync<Request = SelectedFeed, Response = Vec<RssEntry>>,
{
    stream::iter(feeds)
        .then(|feed| async move {
            let outcome = fetcher.fetch(&feed).await;
            if let Err(e) = &outcome {
                warn!(feed = %feed.feed_url, error = %e, "Feed fetch failed");
            }
            (feed, outcome)
        })
        .collect()
        .await
}
