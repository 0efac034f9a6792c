use std::path::{Path, PathBuf};

use domain::error::{EngineError, Result};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

/// Writes `value` as pretty JSON to `path` atomically: serialize, write to
/// a sibling `.tmp` file, fsync, then rename over the destination. A crash
/// mid-write leaves the original file untouched.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| EngineError::Internal(format!("serializing {}: {e}", path.display())))?;

    let tmp_path = tmp_path_for(path);
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| EngineError::Io(format!("creating {}: {e}", tmp_path.display())))?;
    file.write_all(&data)
        .await
        .map_err(|e| EngineError::Io(format!("writing {}: {e}", tmp_path.display())))?;
    file.sync_all()
        .await
        .map_err(|e| EngineError::Io(format!("fsync {}: {e}", tmp_path.display())))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        EngineError::Io(format!(
            "renaming {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

/// Reads and parses `path` as JSON. A missing file or an empty file is
/// treated as the default value (empty registry / empty rule list).
pub async fn read_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(T::default()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Io(format!("parsing {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(EngineError::Io(format!("reading {}: {e}", path.display()))),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    name.push_str(".tmp");
    path.with_file_name(name)
}
