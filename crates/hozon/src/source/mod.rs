//! Clip source: device registry access and clip discovery
//!
//! A registry exposes devices; each device advertises an explicit set of
//! capability tags. The backup uses the first device tagged
//! [`Capability::VideoClips`] to list clips in a run window and fetch
//! their media.

pub mod filter;
pub mod http;
pub mod memory;

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clip::{ClipMetadata, RawClip, RunWindow};
use crate::error::BackupError;
use crate::retry::RetryPolicy;
use crate::upload::Payload;

pub use filter::{normalize_and_filter, CameraFilter};
pub use http::{HttpRegistry, RegistryConfig};
pub use memory::{MemoryDevice, MemoryRegistry};

/// Capability tags a device may carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Lists and serves recorded clips
    VideoClips,
    /// Live camera
    Camera,
    /// Motion sensor
    MotionSensor,
    /// Forward-compatible: tags this crate does not interpret
    Other(String),
}

impl Capability {
    /// Map a registry interface name (`VideoClips`, `video-clips`, ...) to a tag.
    pub fn from_interface(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "videoclips" => Capability::VideoClips,
            "camera" => Capability::Camera,
            "motionsensor" => Capability::MotionSensor,
            _ => Capability::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Capability::VideoClips => "video-clips",
            Capability::Camera => "camera",
            Capability::MotionSensor => "motion-sensor",
            Capability::Other(name) => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device known to the registry.
#[async_trait::async_trait]
pub trait Device: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn capabilities(&self) -> &BTreeSet<Capability>;

    fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// Clip records whose start time lies in `window`.
    async fn query_clips(&self, window: RunWindow) -> Result<Vec<RawClip>>;

    /// Media for one clip, as a stream or an in-memory buffer.
    async fn fetch_clip(&self, clip_id: &str) -> Result<Payload>;
}

/// A connected device registry.
#[async_trait::async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Every device in registry order.
    async fn devices(&self) -> Result<Vec<Arc<dyn Device>>>;

    /// Devices carrying `capability`, in registry order.
    async fn capable_devices(&self, capability: &Capability) -> Result<Vec<Arc<dyn Device>>> {
        Ok(self
            .devices()
            .await?
            .into_iter()
            .filter(|d| d.has_capability(capability))
            .collect())
    }
}

/// Clip listing and fetching against one discovered device.
pub struct ClipSource {
    device: Arc<dyn Device>,
    filter: CameraFilter,
    retry: RetryPolicy,
}

impl ClipSource {
    pub fn new(device: Arc<dyn Device>, filter: CameraFilter, retry: RetryPolicy) -> Self {
        Self {
            device,
            filter,
            retry,
        }
    }

    /// Locate the clip-serving device. Zero candidates is fatal and is not
    /// retried; the registry topology does not change mid-run.
    pub async fn discover(
        registry: &dyn DeviceRegistry,
        filter: CameraFilter,
        retry: RetryPolicy,
    ) -> Result<Self, BackupError> {
        let capability = Capability::VideoClips;
        let devices = registry
            .capable_devices(&capability)
            .await
            .map_err(BackupError::Registry)?;

        let Some(device) = devices.into_iter().next() else {
            return Err(BackupError::NoCapableDevice(capability));
        };

        info!(
            device = %device.id(),
            "Using {} device '{}'",
            capability,
            device.name()
        );
        Ok(Self::new(device, filter, retry))
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn filter(&self) -> &CameraFilter {
        &self.filter
    }

    /// Raw clip records for `window`, retried with backoff.
    pub async fn list_clips(&self, window: RunWindow) -> Result<Vec<RawClip>> {
        let device = &self.device;
        self.retry
            .run("getVideoClips", || async move { device.query_clips(window).await })
            .await
    }

    /// Normalized clips in `window` that pass the camera filter.
    pub async fn new_clips(&self, window: RunWindow) -> Result<Vec<ClipMetadata>, BackupError> {
        let raw = self.list_clips(window).await.map_err(BackupError::Listing)?;
        debug!("Device reported {} clips in {}", raw.len(), window);
        Ok(normalize_and_filter(raw, &self.filter))
    }

    /// Media for `clip`, retried with backoff.
    pub async fn fetch(&self, clip: &ClipMetadata) -> Result<Payload> {
        let device = &self.device;
        let id = clip.id.as_str();
        self.retry
            .run("getVideoClip", || async move { device.fetch_clip(id).await })
            .await
            .with_context(|| format!("failed to fetch media for clip {}", clip.id))
    }
}
