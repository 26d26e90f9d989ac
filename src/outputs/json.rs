//! Atomic JSON file output.
//!
//! Readers of a snapshot must never see a half-written file, so every write
//! goes to a temporary file in the destination directory, is flushed and
//! synced, and then renamed over the target. A failure at any step leaves
//! the previous file as it was.

use crate::error::{IngestError, Result};
use crate::utils::parent_dir;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info, instrument};

/// Pretty-printed JSON with a trailing newline.
pub fn to_pretty_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn persist_error(path: &Path, message: impl std::fmt::Display) -> IngestError {
    IngestError::Persist {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Replace `path` with `bytes` via temp-file-then-rename.
pub fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(|e| persist_error(path, format!("create dir: {e}")))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| persist_error(path, format!("temp file: {e}")))?;
    let write = |tmp: &mut NamedTempFile| -> std::io::Result<()> {
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()
    };
    write(&mut tmp).map_err(|e| persist_error(path, format!("write: {e}")))?;
    tmp.persist(path)
        .map_err(|e| persist_error(path, format!("rename: {}", e.error)))?;
    Ok(())
}

/// Serialize `value` and atomically write it to `path`.
///
/// The blocking file work runs on Tokio's blocking pool.
///
/// # Arguments
///
/// * `value` - Anything serde can turn into JSON
/// * `path` - Destination file; missing parent directories are created
///
/// # Returns
///
/// `Ok(())` once the new contents are in place. On any error the old file,
/// if there was one, is unchanged and the error is an
/// [`IngestError::Persist`] (or a JSON error if serialization failed).
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let bytes = to_pretty_bytes(value)?;
    let len = bytes.len();
    let target: PathBuf = path.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || replace_file(&target, &bytes))
        .await
        .map_err(|e| persist_error(path, format!("writer task failed: {e}")))?;

    match outcome {
        Ok(()) => {
            info!(bytes = len, "Wrote JSON file");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Failed to write JSON file; previous contents left in place");
            Err(e)
        }
    }
}
