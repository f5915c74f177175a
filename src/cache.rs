//! Fetched volumes saved as JSON so a later run can package them without refetching.

use crate::model::Volume;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O failed: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry {path} is not a valid volume: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn cache_path(output_dir: &Path, novel_id: u32, volume_id: u32) -> PathBuf {
    output_dir
        .join(".cache")
        .join(format!("{}-{}.json", novel_id, volume_id))
}

pub fn save_volume(output_dir: &Path, volume: &Volume) -> Result<PathBuf, CacheError> {
    let path = cache_path(output_dir, volume.novel_id, volume.id);
    let io_err = |source| CacheError::Io {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_vec(volume).map_err(|source| CacheError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(io_err)?;
    info!(path = %path.display(), "volume cached");
    Ok(path)
}

/// Cached volume, or `None` when nothing was saved for it.
pub fn load_volume(
    output_dir: &Path,
    novel_id: u32,
    volume_id: u32,
) -> Result<Option<Volume>, CacheError> {
    let path = cache_path(output_dir, novel_id, volume_id);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CacheError::Io { path, source }),
    };
    let volume = serde_json::from_slice(&data).map_err(|source| CacheError::Json {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), "volume loaded from cache");
    Ok(Some(volume))
}
