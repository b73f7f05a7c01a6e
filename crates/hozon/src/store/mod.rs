//! Object store targets for uploaded clips
//!
//! Provides object store backends:
//! - S3-compatible buckets (Google Cloud Storage interoperability by default)
//! - Local filesystem bucket (development and tests)

pub mod local;
pub mod s3;

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::BackupError;

pub use local::LocalStore;
pub use s3::{S3Store, S3StoreConfig};

/// Options applied to every object written by the backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    /// Object is not publicly readable
    pub private: bool,
}

impl PutOptions {
    pub fn private(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            private: true,
        }
    }
}

/// Action taken by a bucket lifecycle rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "storageClass")]
pub enum LifecycleAction {
    Delete,
    SetStorageClass(String),
    Other(String),
}

/// One lifecycle rule of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    pub action: LifecycleAction,
    /// Object age condition in days
    #[serde(default)]
    pub age_days: Option<u32>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl LifecycleRule {
    pub fn delete_after(days: u32) -> Self {
        Self {
            action: LifecycleAction::Delete,
            age_days: Some(days),
            enabled: true,
        }
    }
}

/// Bucket-level metadata used by the verification flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketMetadata {
    pub name: String,
    pub lifecycle: Vec<LifecycleRule>,
}

impl BucketMetadata {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: Vec::new(),
        }
    }

    /// Whether an enabled rule deletes objects at exactly `days` of age.
    pub fn has_delete_rule(&self, days: u32) -> bool {
        self.lifecycle.iter().any(|rule| {
            rule.enabled && rule.action == LifecycleAction::Delete && rule.age_days == Some(days)
        })
    }
}

/// Sink for one streamed object. Nothing is visible under the key until
/// `finish` succeeds.
#[async_trait::async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Commit the object. Returns the number of bytes written.
    async fn finish(self: Box<Self>) -> Result<u64>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// A bucket clips are uploaded into.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn open_writer<'a>(
        &'a self,
        key: &str,
        opts: &PutOptions,
    ) -> Result<Box<dyn ObjectWriter + 'a>>;

    /// Write a whole object in one request.
    async fn put(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()>;

    async fn bucket_metadata(&self) -> Result<BucketMetadata>;
}

/// Builds the object store for a run. Called only once a run has clips to
/// upload, so configuration problems surface before the first upload.
#[async_trait::async_trait]
pub trait StoreFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>, BackupError>;
}

/// Which object store backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    S3(S3StoreConfig),
    Local { root: PathBuf, bucket: String },
}

#[async_trait::async_trait]
impl StoreFactory for StoreConfig {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>, BackupError> {
        match self {
            StoreConfig::S3(config) => {
                let store = S3Store::connect(config).await?;
                Ok(Arc::new(store))
            }
            StoreConfig::Local { root, bucket } => {
                let store = LocalStore::new(root, bucket).map_err(BackupError::Store)?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[async_trait::async_trait]
impl StoreFactory for Arc<dyn ObjectStore> {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>, BackupError> {
        Ok(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_delete_rule() {
        let mut meta = BucketMetadata::new("clips");
        assert!(!meta.has_delete_rule(7));

        meta.lifecycle.push(LifecycleRule {
            action: LifecycleAction::SetStorageClass("COLDLINE".to_string()),
            age_days: Some(7),
            enabled: true,
        });
        meta.lifecycle.push(LifecycleRule::delete_after(30));
        assert!(!meta.has_delete_rule(7));

        meta.lifecycle.push(LifecycleRule {
            enabled: false,
            ..LifecycleRule::delete_after(7)
        });
        assert!(!meta.has_delete_rule(7));

        meta.lifecycle.push(LifecycleRule::delete_after(7));
        assert!(meta.has_delete_rule(7));
    }

    #[test]
    fn test_lifecycle_rule_json() {
        let json = r#"[
            {"action": {"type": "Delete"}, "ageDays": 7},
            {"action": {"type": "SetStorageClass", "storageClass": "NEARLINE"}, "ageDays": 30, "enabled": false}
        ]"#;
        let rules: Vec<LifecycleRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules[0], LifecycleRule::delete_after(7));
        assert_eq!(
            rules[1].action,
            LifecycleAction::SetStorageClass("NEARLINE".to_string())
        );
        assert!(!rules[1].enabled);
    }

    #[tokio::test]
    async fn test_local_config_connects() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Local {
            root: dir.path().join("bucket"),
            bucket: "clips".to_string(),
        };
        let store = config.connect().await.unwrap();
        assert_eq!(store.bucket(), "clips");
        assert!(dir.path().join("bucket").is_dir());
    }
}
