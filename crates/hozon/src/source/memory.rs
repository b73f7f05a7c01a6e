//! In-process device registry
//!
//! Holds clips and their media in memory. Used by tests and for local dry
//! runs without an NVR. Clones of a [`MemoryDevice`] share state, so a test
//! can keep a handle and inspect call counts after a run.

use anyhow::{bail, Result};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{Capability, Device, DeviceRegistry};
use crate::clip::{RawClip, RunWindow};
use crate::upload::Payload;

/// Chunk size used when a device serves media as a stream
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct DeviceState {
    clips: Vec<RawClip>,
    media: HashMap<String, Bytes>,
    failing_fetch: HashSet<String>,
    interrupted: HashMap<String, u32>,
    fetch_counts: HashMap<String, u32>,
}

/// A device backed by in-memory clips.
#[derive(Clone)]
pub struct MemoryDevice {
    id: String,
    name: String,
    capabilities: BTreeSet<Capability>,
    streaming: bool,
    state: Arc<Mutex<DeviceState>>,
    failing_queries: Arc<AtomicU32>,
    queries: Arc<AtomicU32>,
}

impl MemoryDevice {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            capabilities: BTreeSet::new(),
            streaming: false,
            state: Arc::new(Mutex::new(DeviceState::default())),
            failing_queries: Arc::new(AtomicU32::new(0)),
            queries: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Device tagged with [`Capability::VideoClips`]
    pub fn video_clips(id: &str, name: &str) -> Self {
        Self::new(id, name).with_capability(Capability::VideoClips)
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_clip(self, clip: RawClip, media: impl Into<Bytes>) -> Self {
        {
            let mut state = self.lock();
            state.media.insert(clip.id.clone(), media.into());
            state.clips.push(clip);
        }
        self
    }

    /// Serve media as chunked streams instead of buffers
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Fail the next `n` clip queries
    pub fn failing_queries(self, n: u32) -> Self {
        self.failing_queries.store(n, Ordering::SeqCst);
        self
    }

    /// Always fail fetching media for `clip_id`
    pub fn failing_fetch(self, clip_id: &str) -> Self {
        self.lock().failing_fetch.insert(clip_id.to_string());
        self
    }

    /// Cut the stream for `clip_id` after its first chunk on the next `n`
    /// fetches. Implies streaming.
    pub fn interrupting(mut self, clip_id: &str, n: u32) -> Self {
        self.streaming = true;
        self.lock().interrupted.insert(clip_id.to_string(), n);
        self
    }

    /// Add a clip after construction (e.g. between two runs)
    pub fn push_clip(&self, clip: RawClip, media: impl Into<Bytes>) {
        let mut state = self.lock();
        state.media.insert(clip.id.clone(), media.into());
        state.clips.push(clip);
    }

    pub fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self, clip_id: &str) -> u32 {
        self.lock().fetch_counts.get(clip_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        // State is plain data; a panic elsewhere cannot leave it inconsistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl Device for MemoryDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    async fn query_clips(&self, window: RunWindow) -> Result<Vec<RawClip>> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            bail!("device {} unavailable", self.id);
        }

        Ok(self
            .lock()
            .clips
            .iter()
            .filter(|c| window.contains(c.start_time))
            .cloned()
            .collect())
    }

    async fn fetch_clip(&self, clip_id: &str) -> Result<Payload> {
        let (media, interrupt) = {
            let mut state = self.lock();
            *state.fetch_counts.entry(clip_id.to_string()).or_default() += 1;
            if state.failing_fetch.contains(clip_id) {
                bail!("clip {} could not be read from device", clip_id);
            }
            let interrupt = match state.interrupted.get_mut(clip_id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            };
            match state.media.get(clip_id) {
                Some(media) => (media.clone(), interrupt),
                None => bail!("clip {} not found", clip_id),
            }
        };

        if self.streaming {
            let mut chunks: Vec<io::Result<Bytes>> = media
                .chunks(STREAM_CHUNK_SIZE)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            if interrupt {
                chunks.truncate(1);
                chunks.push(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("device dropped stream for clip {}", clip_id),
                )));
            }
            Ok(Payload::Stream(stream::iter(chunks).boxed()))
        } else {
            Ok(Payload::Buffer(media))
        }
    }
}

/// Registry over a fixed list of in-memory devices.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    devices: Vec<MemoryDevice>,
    queries: Arc<AtomicU32>,
}

impl MemoryRegistry {
    pub fn new(devices: Vec<MemoryDevice>) -> Self {
        Self {
            devices,
            queries: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of times the device list was requested
    pub fn device_queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn devices(&self) -> Result<Vec<Arc<dyn Device>>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .devices
            .iter()
            .map(|d| Arc::new(d.clone()) as Arc<dyn Device>)
            .collect())
    }
}
