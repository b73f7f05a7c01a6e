//! Upload engine
//!
//! Writes one clip's media to the object store under its key, retrying with
//! backoff. Media arrives either as a byte stream (piped through an object
//! writer) or as an in-memory buffer (written in one request).
//!
//! Every attempt asks the caller for a fresh payload, so a stream that broke
//! on either side is fetched again from the device instead of being held in
//! memory for replay.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use std::fmt;
use std::future::Future;
use std::io;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;
use crate::store::{ObjectStore, ObjectWriter, PutOptions};

/// Stream of media chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Clip media as handed over by the device.
pub enum Payload {
    Stream(ByteStream),
    Buffer(Bytes),
}

impl Payload {
    /// Stream payload over already available chunks
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Payload::Stream(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Stream(_) => f.write_str("Payload::Stream(..)"),
            Payload::Buffer(b) => write!(f, "Payload::Buffer({} bytes)", b.len()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Buffer(bytes)
    }
}

/// Uploads clip media with per-clip retries.
#[derive(Debug, Clone)]
pub struct Uploader {
    retry: RetryPolicy,
    dry_run: bool,
}

impl Uploader {
    pub fn new(retry: RetryPolicy, dry_run: bool) -> Self {
        Self { retry, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Upload the media produced by `fetch` to `key`.
    ///
    /// `fetch` runs once per attempt. An error from `fetch` itself ends the
    /// upload at once (callers wrap it in their own retries); a read or write
    /// error while transferring is retried with backoff. In dry-run mode the
    /// media is fetched but never read, and nothing is written.
    pub async fn upload<F, Fut>(
        &self,
        store: &dyn ObjectStore,
        key: &str,
        content_type: &str,
        mut fetch: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Payload>>,
    {
        if self.dry_run {
            let payload = fetch().await?;
            info!("DRY RUN: Skipping upload of {} ({}, {:?})", key, content_type, payload);
            return Ok(());
        }

        let opts = PutOptions::private(content_type);
        let attempts = self.retry.attempts();
        let mut attempt = 1;

        loop {
            let payload = fetch().await?;
            match write_attempt(store, key, payload, &opts).await {
                Ok(bytes) => {
                    info!("Uploaded {} successfully ({} bytes)", key, bytes);
                    return Ok(());
                }
                Err(e) if attempt >= attempts => {
                    return Err(anyhow!(
                        "upload of {} failed after {} attempts: {:#}",
                        key,
                        attempts,
                        e
                    ));
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Upload attempt {} for {} failed, retrying in {}ms: {:#}",
                        attempt,
                        key,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

async fn write_attempt(
    store: &dyn ObjectStore,
    key: &str,
    payload: Payload,
    opts: &PutOptions,
) -> Result<u64> {
    match payload {
        Payload::Buffer(bytes) => {
            let len = bytes.len() as u64;
            store.put(key, bytes, opts).await?;
            Ok(len)
        }
        Payload::Stream(stream) => {
            let mut writer = store.open_writer(key, opts).await?;

            if let Err(e) = pipe(writer.as_mut(), stream).await {
                if let Err(abort_err) = writer.abort().await {
                    debug!("Aborting partial upload of {} failed: {:#}", key, abort_err);
                }
                return Err(e);
            }

            writer.finish().await
        }
    }
}

/// Drain `stream` into `writer` chunk by chunk.
async fn pipe<'w>(writer: &mut (dyn ObjectWriter + 'w), mut stream: ByteStream) -> Result<()> {
    while let Some(item) = stream.next().await {
        let chunk = item.context("reading media from device failed")?;
        writer.write(chunk).await?;
    }
    Ok(())
}
