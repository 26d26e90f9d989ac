//! Small helpers for text cleanup, timestamps and file system checks.
//!
//! - Text compaction, HTML stripping and slugs for normalization
//! - Timestamp parsing for the formats providers actually send
//! - JSON extraction from chat completions
//! - Output directory validation

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Current UTC time truncated to whole seconds.
pub fn utc_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// `2024-01-01T00:00:00Z`
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a provider timestamp into UTC.
///
/// Accepts RFC 3339, RFC 2822 (RSS `pubDate`) and the NewsData
/// `YYYY-MM-DD HH:MM:SS` form, which is UTC without an offset.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes on a char boundary with
/// `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= max)
        .last()
        .unwrap_or(0);
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Collapse whitespace runs and cap at `limit` chars, ending in `...` when cut.
pub fn compact_text(value: &str, limit: usize) -> String {
    let compact = WHITESPACE.replace_all(value.trim(), " ");
    if compact.chars().count() <= limit {
        return compact.into_owned();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = compact.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Plain text of an HTML fragment, entities decoded.
pub fn strip_html(value: &str) -> String {
    if value.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(value);
    let text = fragment.root_element().text().collect::<Vec<_>>().join("");
    text.trim().to_string()
}

/// Lowercase, ASCII alphanumerics joined by single hyphens.
///
/// ```ignore
/// assert_eq!(slugify("The Guardian (UK)"), "the-guardian-uk");
/// ```
pub fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    NON_SLUG
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Pull the outermost `{...}` object out of model output that may be
/// wrapped in prose or code fences. Empty when there is none.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with('{') && text.ends_with('}') {
        return text;
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => "",
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}

/// Parent directory of `path`, `.` for bare file names.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
