//! Digest file output with dated archive copies.
//!
//! ```text
//! data/
//! ├── rss_openai_daily.json              # latest digest, overwritten each run
//! └── history/
//!     └── rss_openai_daily_2025-05-06.json
//! ```

use crate::error::Result;
use crate::models::DigestSnapshot;
use crate::outputs::json::write_json_atomic;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// `<archive_dir>/<output stem>_<YYYY-MM-DD>.json`, dated by `generated_at`.
pub fn archive_path(output: &Path, archive_dir: &Path, digest: &DigestSnapshot) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("digest");
    let date = digest.generated_at.format("%Y-%m-%d");
    archive_dir.join(format!("{stem}_{date}.json"))
}

/// Write the digest and, when `archive_dir` is given, its dated copy.
///
/// Returns the archive path that was written, if any.
#[instrument(level = "info", skip_all, fields(output = %output.display()))]
pub async fn write_digest(
    digest: &DigestSnapshot,
    output: &Path,
    archive_dir: Option<&Path>,
) -> Result<Option<PathBuf>> {
    write_json_atomic(digest, output).await?;
    let Some(dir) = archive_dir else {
        return Ok(None);
    };
    let archive = archive_path(output, dir, digest);
    write_json_atomic(digest, &archive).await?;
    info!(archive = %archive.display(), "Wrote digest archive copy");
    Ok(Some(archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DigestRequest, SCHEMA_VERSION};
    use chrono::DateTime;

    fn digest() -> DigestSnapshot {
        DigestSnapshot {
            schema_version: SCHEMA_VERSION.into(),
            generated_at: DateTime::from_timestamp(1_746_563_400, 0).unwrap(),
            catalog_path: "feed_catalog/rss_feeds.json".into(),
            request: DigestRequest {
                max_sources: 10,
                feeds_per_source: 1,
                max_items_per_feed: 3,
                max_items: 30,
                source_ids: vec![],
            },
            summarizer: None,
            items: vec![],
            errors: vec![],
        }
    }

    #[test]
    fn test_archive_path_uses_stem_and_date() {
        let p = archive_path(
            Path::new("data/rss_openai_daily.json"),
            Path::new("data/history"),
            &digest(),
        );
        assert_eq!(p, Path::new("data/history/rss_openai_daily_2025-05-06.json"));
    }

    #[tokio::test]
    async fn test_write_digest_with_and_without_archive() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("daily.json");
        let hist = dir.path().join("history");

        let none = write_digest(&digest(), &out, None).await.unwrap();
        assert!(none.is_none());
        assert!(!hist.exists());

        let archived = write_digest(&digest(), &out, Some(&hist)).await.unwrap().unwrap();
        assert!(archived.ends_with("daily_2025-05-06.json"));
        let copy: DigestSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&archived).unwrap()).unwrap();
        assert_eq!(copy, digest());
    }
}
