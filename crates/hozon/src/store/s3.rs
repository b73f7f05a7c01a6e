//! S3-compatible object store backend
//!
//! Talks to any S3-compatible endpoint. The default endpoint is the Google
//! Cloud Storage interoperability API, authenticated with an HMAC key pair
//! read from a JSON key file:
//!
//! ```json
//! { "access_key_id": "GOOG1E...", "secret_access_key": "..." }
//! ```
//!
//! Streamed objects use a multipart upload once they exceed one part;
//! smaller objects are sent with a single `PutObject`.

use anyhow::{anyhow, Context, Result};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, ExpirationStatus, ObjectCannedAcl,
};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    BucketMetadata, LifecycleAction, LifecycleRule, ObjectStore, ObjectWriter, PutOptions,
};
use crate::error::BackupError;

/// Google Cloud Storage interoperability endpoint
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Multipart part size (S3 requires at least 5 MiB for all but the last part)
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Configuration for an S3-compatible bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3StoreConfig {
    /// Project owning the bucket (`GCS_PROJECT_ID`)
    pub project_id: Option<String>,
    /// Bucket name (`GCS_BUCKET_NAME`)
    pub bucket: Option<String>,
    /// HMAC key file (`GCS_KEYFILE_PATH`)
    pub keyfile: Option<PathBuf>,
    pub endpoint_url: String,
    pub region: String,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            bucket: None,
            keyfile: None,
            endpoint_url: String::from(GCS_ENDPOINT),
            region: String::from("auto"),
        }
    }
}

impl S3StoreConfig {
    /// Check that project, bucket and key file are all present.
    pub fn validate(&self) -> Result<(&str, &str, &PathBuf), BackupError> {
        match (&self.project_id, &self.bucket, &self.keyfile) {
            (Some(project), Some(bucket), Some(keyfile))
                if !project.is_empty() && !bucket.is_empty() =>
            {
                Ok((project.as_str(), bucket.as_str(), keyfile))
            }
            _ => Err(BackupError::Config(
                "GCS configuration missing: PROJECT_ID, BUCKET_NAME, KEYFILE_PATH".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct HmacKey {
    access_key_id: String,
    secret_access_key: String,
}

/// Only the `type` field, present in Google service-account key files
#[derive(Deserialize)]
struct KeyFileKind {
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn parse_keyfile(keyfile: &Path, data: &[u8]) -> Result<HmacKey, BackupError> {
    if let Ok(KeyFileKind { kind: Some(kind) }) = serde_json::from_slice(data) {
        if kind == "service_account" {
            return Err(BackupError::Config(format!(
                "key file {:?} is a service-account key; create an HMAC key for the \
                 service account and point GCS_KEYFILE_PATH at a JSON file with \
                 access_key_id and secret_access_key",
                keyfile
            )));
        }
    }
    serde_json::from_slice(data)
        .map_err(|e| BackupError::Config(format!("invalid key file {:?}: {}", keyfile, e)))
}

/// S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Validate the configuration and build a client. Does not contact the
    /// endpoint.
    pub async fn connect(config: &S3StoreConfig) -> Result<Self, BackupError> {
        let (project, bucket, keyfile) = config.validate()?;

        let data = tokio::fs::read(keyfile).await.map_err(|e| {
            BackupError::Config(format!("cannot read key file {:?}: {}", keyfile, e))
        })?;
        let key = parse_keyfile(keyfile, &data)?;

        let credentials = Credentials::new(
            key.access_key_id,
            key.secret_access_key,
            None,
            None,
            "hozon-keyfile",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        info!(
            "Object store: bucket {} in project {} at {}",
            bucket, project, config.endpoint_url
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.to_string(),
        })
    }

    async fn put_object(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&opts.content_type)
            .body(ByteStream::from(data));
        if opts.private {
            req = req.acl(ObjectCannedAcl::Private);
        }
        req.send()
            .await
            .with_context(|| format!("PutObject {} failed", key))?;
        Ok(())
    }
}

/// Multipart writer; parts are only started once more than one part of
/// data has been written.
struct S3Writer {
    client: Client,
    bucket: String,
    key: String,
    opts: PutOptions,
    buf: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    bytes_written: u64,
}

impl S3Writer {
    async fn ensure_upload(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let mut req = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(&self.opts.content_type);
        if self.opts.private {
            req = req.acl(ObjectCannedAcl::Private);
        }
        let out = req
            .send()
            .await
            .with_context(|| format!("CreateMultipartUpload {} failed", self.key))?;
        let id = out
            .upload_id()
            .ok_or_else(|| anyhow!("CreateMultipartUpload {} returned no upload id", self.key))?
            .to_string();
        debug!("Started multipart upload {} for {}", id, self.key);
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, data: Bytes) -> Result<()> {
        let upload_id = self.ensure_upload().await?;
        let part_number = self.parts.len() as i32 + 1;
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("UploadPart {} of {} failed", part_number, self.key))?;
        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(out.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectWriter for S3Writer {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.bytes_written += chunk.len() as u64;
        self.buf.extend_from_slice(&chunk);
        while self.buf.len() > PART_SIZE {
            let part = self.buf.split_to(PART_SIZE).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let mut this = *self;
        let rest = std::mem::take(&mut this.buf).freeze();

        if this.upload_id.is_none() {
            let mut req = this
                .client
                .put_object()
                .bucket(&this.bucket)
                .key(&this.key)
                .content_type(&this.opts.content_type)
                .body(ByteStream::from(rest));
            if this.opts.private {
                req = req.acl(ObjectCannedAcl::Private);
            }
            req.send()
                .await
                .with_context(|| format!("PutObject {} failed", this.key))?;
            return Ok(this.bytes_written);
        }

        if !rest.is_empty() {
            this.upload_part(rest).await?;
        }
        let upload_id = this.ensure_upload().await?;
        this.client
            .complete_multipart_upload()
            .bucket(&this.bucket)
            .key(&this.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(std::mem::take(&mut this.parts)))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("CompleteMultipartUpload {} failed", this.key))?;
        Ok(this.bytes_written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let Some(upload_id) = &self.upload_id else {
            return Ok(());
        };
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|| format!("AbortMultipartUpload {} failed", self.key))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn open_writer<'a>(
        &'a self,
        key: &str,
        opts: &PutOptions,
    ) -> Result<Box<dyn ObjectWriter + 'a>> {
        Ok(Box::new(S3Writer {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            opts: opts.clone(),
            buf: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
            bytes_written: 0,
        }))
    }

    async fn put(&self, key: &str, data: Bytes, opts: &PutOptions) -> Result<()> {
        self.put_object(key, data, opts).await
    }

    async fn bucket_metadata(&self) -> Result<BucketMetadata> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("HeadBucket {} failed", self.bucket))?;

        let mut meta = BucketMetadata::new(&self.bucket);
        // A bucket without lifecycle configuration answers with an error
        let lifecycle = match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) => {
                debug!("No lifecycle configuration on {}: {}", self.bucket, e);
                return Ok(meta);
            }
        };

        for rule in lifecycle.rules() {
            let enabled = *rule.status() == ExpirationStatus::Enabled;
            if let Some(days) = rule.expiration().and_then(|e| e.days()) {
                meta.lifecycle.push(LifecycleRule {
                    action: LifecycleAction::Delete,
                    age_days: u32::try_from(days).ok(),
                    enabled,
                });
            }
            for transition in rule.transitions() {
                let class = transition
                    .storage_class()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_default();
                meta.lifecycle.push(LifecycleRule {
                    action: LifecycleAction::SetStorageClass(class),
                    age_days: transition.days().and_then(|d| u32::try_from(d).ok()),
                    enabled,
                });
            }
        }
        Ok(meta)
    }
}
