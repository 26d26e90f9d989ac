//! Per-item summarization through the OpenAI chat completions API.
//!
//! Each digest item is sent on its own so that one bad answer costs one
//! item, not the whole digest. The model is asked for a JSON object:
//!
//! ```json
//! { "summary": "One neutral sentence.", "tags": ["economy", "trade", "china"] }
//! ```

use crate::api::{FetchAsync, RetryFetch, check_status};
use crate::error::{IngestError, Result};
use crate::models::{DigestItem, TokenUsage};
use crate::utils::{extract_json, looks_truncated, truncate_for_log};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You summarize news items. For the item, return a short summary \
(max 1 sentence) and 3-6 topical tags. Use neutral language.";

/// What the model produced for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSummary {
    pub summary: String,
    pub tags: Vec<String>,
    pub response_id: Option<String>,
    pub usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ModelAnswer {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat messages for one item.
pub fn build_messages(item: &DigestItem) -> Value {
    let payload = json!({
        "id": item.id,
        "title": item.title,
        "source": item.source_name,
        "published": item.published,
        "summary": item.summary,
        "link": item.link,
    });
    let user = format!(
        "Return JSON with keys: summary (string), tags (array of short strings). \
Only return JSON.\n{payload}"
    );
    json!([
        {"role": "system", "content": SYSTEM_PROMPT},
        {"role": "user", "content": user},
    ])
}

/// Decode a chat completion body into an [`ItemSummary`].
pub fn parse_completion(body: Value) -> Result<ItemSummary> {
    let completion: Completion = serde_json::from_value(body)?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| IngestError::Api("completion has no choices".into()))?;
    let content = choice
        .message
        .and_then(|m| m.content)
        .unwrap_or_default();
    let truncated_by_limit = choice.finish_reason.as_deref() == Some("length");

    let raw = extract_json(&content);
    if raw.is_empty() {
        if truncated_by_limit {
            return Err(IngestError::Truncated(truncate_for_log(&content, 200)));
        }
        return Err(IngestError::Api("model returned no JSON object".into()));
    }

    let answer: ModelAnswer = match serde_json::from_str(raw) {
        Ok(a) => a,
        Err(e) if looks_truncated(&e) || truncated_by_limit => {
            return Err(IngestError::Truncated(truncate_for_log(raw, 200)));
        }
        Err(e) => return Err(e.into()),
    };

    let summary = answer.summary.trim().to_string();
    if summary.is_empty() {
        return Err(IngestError::Api("model returned an empty summary".into()));
    }
    let tags = answer
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(ItemSummary {
        summary,
        tags,
        response_id: completion.id,
        usage: completion.usage.unwrap_or_default(),
    })
}

/// Single-attempt summarizer.
pub struct OpenAiSummarizer {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSummarizer")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiSummarizer {
    pub fn new(http: Client, endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl FetchAsync for OpenAiSummarizer {
    type Request = DigestItem;
    type Response = ItemSummary;

    #[instrument(level = "info", skip_all, fields(item = %item.id))]
    async fn fetch(&self, item: &DigestItem) -> Result<ItemSummary> {
        let payload = json!({
            "model": self.model,
            "messages": build_messages(item),
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
        });
        let t0 = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: Value = response.json().await?;
        let parsed = parse_completion(body);
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, ok = parsed.is_ok(), "Completion received");
        parsed
    }
}

/// Summarize one item with retries, re-asking once if the answer came back
/// truncated.
#[instrument(level = "info", skip_all, fields(item = %item.id))]
pub async fn summarize_with_backoff<T>(client: &RetryFetch<T>, item: &DigestItem) -> Result<ItemSummary>
where
    T: FetchAsync<Request = DigestItem, Response = ItemSummary>,
{
    let t0 = Instant::now();
    let res = match client.fetch(item).await {
        Err(IngestError::Truncated(preview)) => {
            warn!(%preview, "Truncated answer; re-asking once");
            client.fetch(item).await
        }
        other => other,
    };
    match &res {
        Ok(s) => info!(
            elapsed_ms_total = t0.elapsed().as_millis() as u64,
            tags = s.tags.len(),
            "Summarized item"
        ),
        Err(e) => warn!(elapsed_ms_total = t0.elapsed().as_millis() as u64, error = %e, "Summarization failed"),
    }
    res
}
