//! JSON snapshot files.
//!
//! Writes go to a sibling temporary file which is then renamed over the
//! target, so readers never observe a half-written snapshot.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StateResult;

/// Read a snapshot, returning `None` when the file does not exist yet.
pub(crate) async fn load<T: DeserializeOwned>(path: &Path) -> StateResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)?;
            debug!(path = %path.display(), "snapshot loaded");
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically replace the snapshot at `path`.
pub(crate) async fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> StateResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
