//! Persisted backup checkpoint
//!
//! The checkpoint is the high-water mark below which every clip is known to
//! be backed up. It is stored as `{"lastTimestamp": <ms>}`.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::clip::{now_ms, Timestamp};

/// How far back a run starts when no checkpoint exists
pub const DEFAULT_LOOKBACK_MS: i64 = 24 * 60 * 60 * 1000;

/// Checkpoint used when nothing usable is persisted.
pub fn default_checkpoint() -> Timestamp {
    now_ms() - DEFAULT_LOOKBACK_MS
}

/// Storage for the last processed timestamp.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persisted value, or `now - 24h` when missing or unreadable.
    async fn read(&self) -> Timestamp;

    /// Persist a new value. Either fully replaces the old value or leaves it.
    async fn write(&self, timestamp: Timestamp) -> io::Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupState {
    last_timestamp: Timestamp,
}

/// JSON file checkpoint (`STATE_FILE_PATH`)
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> anyhow::Result<Timestamp> {
        let data = tokio::fs::read(&self.path).await?;
        let state: BackupState = serde_json::from_slice(&data)?;
        Ok(state.last_timestamp)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "backup-state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn read(&self) -> Timestamp {
        match self.load().await {
            Ok(ts) => {
                debug!("Loaded checkpoint {} from {:?}", ts, self.path);
                ts
            }
            Err(e) => {
                warn!(
                    "No usable state file at {:?} ({:#}), starting from 24 hours ago",
                    self.path, e
                );
                default_checkpoint()
            }
        }
    }

    async fn write(&self, timestamp: Timestamp) -> io::Result<()> {
        let state = BackupState {
            last_timestamp: timestamp,
        };
        let bytes = serde_json::to_vec_pretty(&state).map_err(io::Error::other)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write beside the target and rename so readers never see a torn file
        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        debug!("Checkpoint {} written to {:?}", timestamp, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_defaults_to_a_day_ago() {
        let dir = tempdir().unwrap();
        let store = FileCheckpoint::new(dir.path().join("state.json"));

        let expected = now_ms() - DEFAULT_LOOKBACK_MS;
        let ts = store.read().await;
        assert!((ts - expected).abs() < 1000, "got {} expected ~{}", ts, expected);
    }

    #[tokio::test]
    async fn test_corrupt_file_defaults_to_a_day_ago() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();

        let expected = now_ms() - DEFAULT_LOOKBACK_MS;
        let ts = FileCheckpoint::new(&path).read().await;
        assert!((ts - expected).abs() < 1000);
    }

    #[tokio::test]
    async fn test_reads_existing_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"lastTimestamp": 1234567890}"#).unwrap();

        assert_eq!(FileCheckpoint::new(&path).read().await, 1234567890);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FileCheckpoint::new(&path);

        store.write(1_700_000_000_000).await.unwrap();
        assert_eq!(store.read().await, 1_700_000_000_000);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["lastTimestamp"], 1_700_000_000_000i64);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileCheckpoint::new(&path);
        store.write(42).await.unwrap();

        // A directory squatting on the temp path makes the write fail
        std::fs::create_dir(store.temp_path()).unwrap();
        assert!(store.write(99).await.is_err());

        assert_eq!(store.read().await, 42);
    }
}
