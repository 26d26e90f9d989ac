//! Secret and setting lookup.
//!
//! A value comes from the process environment first, then from the first
//! `.env` candidate file that defines it. `.env` files are read without
//! touching the process environment.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_NEWSDATA_KEY: &str = "NEWSDATA_API_KEY";
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// `.env` files consulted, in order, relative to the working directory.
pub fn default_env_files() -> Vec<PathBuf> {
    vec![PathBuf::from(".env"), Path::new("RSS_Feeds").join(".env")]
}

/// Look up `key` in a single `.env` file.
///
/// Missing or unreadable files yield `None`; so do empty values.
pub fn read_env_file(path: &Path, key: &str) -> Option<String> {
    if !path.exists() {
        return None;
    }
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read env file");
            return None;
        }
    };
    for item in iter {
        match item {
            Ok((k, v)) if k == key => {
                let v = v.trim().to_string();
                return (!v.is_empty()).then_some(v);
            }
            Ok(_) => {}
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unparsable env line");
            }
        }
    }
    None
}

/// Environment first, then each file in `files`.
pub fn lookup(key: &str, files: &[PathBuf]) -> Option<String> {
    if let Ok(v) = std::env::var(key) {
        if !v.trim().is_empty() {
            return Some(v.trim().to_string());
        }
    }
    files.iter().find_map(|path| {
        let found = read_env_file(path, key);
        if found.is_some() {
            debug!(key, path = %path.display(), "Loaded setting from env file");
        }
        found
    })
}

/// Prefer an explicit value (flag or env var already resolved by clap).
pub fn resolve(explicit: Option<&str>, key: &str, files: &[PathBuf]) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| lookup(key, files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_reads_quoted_value() {
        let (_dir, path) = env_file("# comment\nOTHER=1\nNEWSWIRE_TEST_KEY=\"abc123\"\n");
        assert_eq!(
            read_env_file(&path, "NEWSWIRE_TEST_KEY").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_missing_key_and_missing_file() {
        let (dir, path) = env_file("OTHER=1\n");
        assert!(read_env_file(&path, "NEWSWIRE_TEST_KEY").is_none());
        assert!(read_env_file(&dir.path().join("absent"), "OTHER").is_none());
    }

    #[test]
    fn test_lookup_walks_files_in_order() {
        let (_d1, first) = env_file("NEWSWIRE_TEST_ORDER=\n");
        let (_d2, second) = env_file("NEWSWIRE_TEST_ORDER=from-second\n");
        let got = lookup("NEWSWIRE_TEST_ORDER", &[first, second]);
        assert_eq!(got.as_deref(), Some("from-second"));
    }

    #[test]
    fn test_resolve_prefers_explicit() {
        let (_d, file) = env_file("NEWSWIRE_TEST_RESOLVE=file\n");
        assert_eq!(
            resolve(Some(" flag "), "NEWSWIRE_TEST_RESOLVE", &[file.clone()]).as_deref(),
            Some("flag")
        );
        assert_eq!(
            resolve(Some(""), "NEWSWIRE_TEST_RESOLVE", &[file]).as_deref(),
            Some("file")
        );
    }
}
