//! Local filesystem object store
//!
//! Stores objects as files under a root directory, one file per key.
//! Streamed objects go to a `.part` file that is renamed into place on
//! finish, so an aborted upload never leaves a truncated clip behind.
//! Lifecycle rules, if any, are read from `<root>/.lifecycle.json`.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{BucketMetadata, LifecycleRule, ObjectStore, ObjectWriter, PutOptions};

const LIFECYCLE_FILE: &str = ".lifecycle.json";

/// Local directory acting as a bucket
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    /// Create the store, creating `root` if needed.
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create bucket directory: {:?}", root))?;
        Ok(Self {
            root,
            bucket: bucket.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`. Rejects keys that would escape the root.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object key: {:?}", key);
        }
        Ok(self.root.join(rel))
    }

    async fn create_part(&self, key: &str) -> Result<(PathBuf, PathBuf, File)> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let mut part_name = path.as_os_str().to_os_string();
        part_name.push(".part");
        let part = PathBuf::from(part_name);
        let file = File::create(&part)
            .await
            .with_context(|| format!("Failed to create {:?}", part))?;
        Ok((path, part, file))
    }
}

/// Writer for one local object
struct LocalWriter {
    path: PathBuf,
    part: PathBuf,
    file: File,
    bytes_written: u64,
}

#[async_trait::async_trait]
impl ObjectWriter for LocalWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.file.write_all(&chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let LocalWriter {
            path,
            part,
            mut file,
            bytes_written,
        } = *self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&part, &path)
            .await
            .with_context(|| format!("Failed to move {:?} into place", part))?;
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let LocalWriter { part, file, .. } = *self;
        drop(file);
        fs::remove_file(&part).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn open_writer<'a>(
        &'a self,
        key: &str,
        _opts: &PutOptions,
    ) -> Result<Box<dyn ObjectWriter + 'a>> {
        let (path, part, file) = self.create_part(key).await?;
        Ok(Box::new(LocalWriter {
            path,
            part,
            file,
            bytes_written: 0,
        }))
    }

    async fn put(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()> {
        let mut writer = self.open_writer(key, opts).await?;
        if let Err(e) = writer.write(data).await {
            let _ = writer.abort().await;
            return Err(e);
        }
        let written = writer.finish().await?;
        debug!("Wrote {} bytes to {}/{}", written, self.bucket, key);
        Ok(())
    }

    async fn bucket_metadata(&self) -> Result<BucketMetadata> {
        let mut meta = BucketMetadata::new(&self.bucket);
        let path = self.root.join(LIFECYCLE_FILE);
        match fs::read(&path).await {
            Ok(data) => {
                let rules: Vec<LifecycleRule> = serde_json::from_slice(&data)
                    .with_context(|| format!("Invalid lifecycle file {:?}", path))?;
                meta.lifecycle = rules;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(meta)
    }
}
