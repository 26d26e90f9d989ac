//! Identity and deduplication of canonical articles.
//!
//! An article is identified by its provider id when it has one, otherwise by
//! (`link`, `published_at`). Records with neither fall back to
//! (`title`, `published_at`, `source_id`). The first record seen for a key
//! wins, whether the earlier one is already persisted or earlier in the same
//! batch.

use crate::models::Article;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArticleKey {
    Id(String),
    LinkPublished {
        link: String,
        published_at: Option<DateTime<Utc>>,
    },
    /// No id and no link.
    Untracked {
        title: Option<String>,
        published_at: Option<DateTime<Utc>>,
        source_id: String,
    },
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ArticleKey {
    pub fn of(article: &Article) -> Self {
        if let Some(id) = non_blank(article.id.as_deref()) {
            return ArticleKey::Id(id.to_string());
        }
        match non_blank(article.link.as_deref()) {
            Some(link) => ArticleKey::LinkPublished {
                link: link.to_string(),
                published_at: article.published_at,
            },
            None => ArticleKey::Untracked {
                title: non_blank(article.title.as_deref()).map(str::to_string),
                published_at: article.published_at,
                source_id: article.source_id.clone(),
            },
        }
    }
}

/// New records that survived, plus how many were dropped as duplicates.
#[derive(Debug, Default)]
pub struct Deduped {
    pub fresh: Vec<Article>,
    pub duplicates: usize,
}

/// Return the records of `batch` whose key is not in `existing` nor earlier
/// in `batch`, in batch order.
pub fn dedupe(existing: &[Article], batch: Vec<Article>) -> Deduped {
    let mut seen: HashSet<ArticleKey> = existing.iter().map(ArticleKey::of).collect();
    let mut out = Deduped::default();
    for article in batch {
        if seen.insert(ArticleKey::of(&article)) {
            out.fresh.push(article);
        } else {
            out.duplicates += 1;
        }
    }
    debug!(
        existing = existing.len(),
        fresh = out.fresh.len(),
        duplicates = out.duplicates,
        "Deduplicated batch"
    );
    out
}
