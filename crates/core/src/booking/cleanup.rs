//! Best-effort removal of staged files.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A staged path that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Size of a staged file; a missing file counts as empty.
pub async fn file_size(path: &Path) -> Result<u64, std::io::Error> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Creates a fresh private directory under `root` for one staged file.
///
/// The directory outlives this call; `discard_staged` removes it.
pub async fn create_staging_dir(root: &Path, prefix: &str) -> Result<PathBuf, std::io::Error> {
    tokio::fs::create_dir_all(root).await?;
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
    Ok(dir.keep())
}

/// Deletes a staged file and the temporary directory holding it.
///
/// Paths that are already gone are fine. Everything else is logged and
/// returned, never raised.
pub async fn discard_staged(path: &Path) -> Vec<CleanupFailure> {
    let mut failures = Vec::new();

    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Staged file removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove staged file");
            failures.push(CleanupFailure {
                path: path.to_path_buf(),
                error: e.to_string(),
            });
        }
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Staging directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to remove staging directory");
                failures.push(CleanupFailure {
                    path: dir.to_path_buf(),
                    error: e.to_string(),
                });
            }
        }
    }

    failures
}
