//! Backup orchestrator
//!
//! One run reads the checkpoint, lists clips recorded since then, uploads
//! them with bounded concurrency and advances the checkpoint to the latest
//! end time among successfully uploaded clips.
//!
//! ```text
//! Idle → CheckpointRead → Listing → NoNewClips → Done
//!                            │
//!                            └→ Processing → StateUpdate → Done
//! ```
//!
//! Per-clip failures are counted and never abort sibling uploads. Discovery,
//! listing, store construction and checkpoint persistence failures end the
//! run with a [`BackupError`] and leave the checkpoint as it was.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::clip::{format_ms, now_ms, ClipMetadata, RunWindow, Timestamp};
use crate::config::DEFAULT_MAX_CONCURRENT_UPLOADS;
use crate::error::BackupError;
use crate::retry::RetryPolicy;
use crate::source::{CameraFilter, ClipSource, DeviceRegistry};
use crate::store::{ObjectStore, StoreFactory};
use crate::upload::Uploader;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub filter: CameraFilter,
    /// Upload permits (0 is treated as 1)
    pub max_concurrent_uploads: usize,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    /// Abort the run when it takes longer than this
    pub run_timeout: Option<Duration>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            filter: CameraFilter::all(),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            retry: RetryPolicy::default(),
            dry_run: false,
            run_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    CheckpointRead,
    Listing,
    NoNewClips,
    Processing,
    StateUpdate,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::CheckpointRead => "checkpoint-read",
            RunState::Listing => "listing",
            RunState::NoNewClips => "no-new-clips",
            RunState::Processing => "processing",
            RunState::StateUpdate => "state-update",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing to upload; checkpoint and store untouched
    NoNewClips,
    /// Checkpoint persisted at the new value
    Advanced { to: Timestamp },
    /// No clip succeeded; checkpoint untouched
    Unchanged,
    /// Dry run; the checkpoint is never persisted
    DryRun { would_advance_to: Option<Timestamp> },
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub window: RunWindow,
    pub clips_found: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub checkpoint_before: Timestamp,
    pub checkpoint_after: Timestamp,
    pub outcome: RunOutcome,
}

impl RunReport {
    fn untouched(window: RunWindow) -> Self {
        Self {
            window,
            clips_found: 0,
            uploaded: 0,
            failed: 0,
            checkpoint_before: window.start_ms,
            checkpoint_after: window.start_ms,
            outcome: RunOutcome::NoNewClips,
        }
    }
}

struct Transitions {
    state: RunState,
}

impl Transitions {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Drives backup runs against a registry, checkpoint and object store.
pub struct Backup {
    options: BackupOptions,
    registry: Arc<dyn DeviceRegistry>,
    checkpoint: Arc<dyn CheckpointStore>,
    stores: Arc<dyn StoreFactory>,
}

impl Backup {
    pub fn new(
        options: BackupOptions,
        registry: Arc<dyn DeviceRegistry>,
        checkpoint: Arc<dyn CheckpointStore>,
        stores: Arc<dyn StoreFactory>,
    ) -> Self {
        Self {
            options,
            registry,
            checkpoint,
            stores,
        }
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Execute one run.
    pub async fn run(&self) -> Result<RunReport, BackupError> {
        let mut transitions = Transitions::new();

        let result = match self.options.run_timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute(&mut transitions))
                .await
                .unwrap_or(Err(BackupError::DeadlineExceeded(limit))),
            None => self.execute(&mut transitions).await,
        };

        match &result {
            Ok(_) => transitions.enter(RunState::Done),
            Err(e) => {
                transitions.enter(RunState::Failed);
                error!("Backup run failed: {}", e);
            }
        }
        result
    }

    async fn execute(&self, transitions: &mut Transitions) -> Result<RunReport, BackupError> {
        let start = self.checkpoint.read().await;
        let window = RunWindow::new(start, now_ms());
        transitions.enter(RunState::CheckpointRead);
        info!("Backing up clips in {}", window);

        if window.is_empty() {
            info!("Checkpoint is not behind the clock; nothing to do");
            transitions.enter(RunState::NoNewClips);
            return Ok(RunReport::untouched(window));
        }

        transitions.enter(RunState::Listing);
        let source = ClipSource::discover(
            self.registry.as_ref(),
            self.options.filter.clone(),
            self.options.retry,
        )
        .await?;
        let mut clips = source.new_clips(window).await?;

        if clips.is_empty() {
            info!("No new clips found");
            transitions.enter(RunState::NoNewClips);
            return Ok(RunReport::untouched(window));
        }

        info!("Found {} new clips", clips.len());
        clips.sort_by_key(|c| c.start_time);
        let clips_found = clips.len();

        transitions.enter(RunState::Processing);
        let store = self.stores.connect().await?;
        let (uploaded, failed, latest) = self.process(Arc::new(source), store, clips, start).await;

        if failed > 0 {
            warn!("{} clips failed to process", failed);
        }

        transitions.enter(RunState::StateUpdate);
        let outcome = if self.options.dry_run {
            let would_advance_to = (latest > start).then_some(latest);
            if let Some(ts) = would_advance_to {
                info!("DRY RUN: state would be updated to {}", format_ms(ts));
            }
            RunOutcome::DryRun { would_advance_to }
        } else if latest <= start {
            warn!("No successful uploads; state unchanged");
            RunOutcome::Unchanged
        } else {
            self.checkpoint
                .write(latest)
                .await
                .map_err(BackupError::CheckpointWrite)?;
            info!("Backup completed, state updated to {}", format_ms(latest));
            RunOutcome::Advanced { to: latest }
        };

        let checkpoint_after = match outcome {
            RunOutcome::Advanced { to } => to,
            _ => start,
        };

        Ok(RunReport {
            window,
            clips_found,
            uploaded,
            failed,
            checkpoint_before: start,
            checkpoint_after,
            outcome,
        })
    }

    /// Upload every clip under the concurrency cap. Returns the success and
    /// failure counts and the latest successful end time (at least `start`).
    async fn process(
        &self,
        source: Arc<ClipSource>,
        store: Arc<dyn ObjectStore>,
        clips: Vec<ClipMetadata>,
        start: Timestamp,
    ) -> (usize, usize, Timestamp) {
        let permits = self.options.max_concurrent_uploads.max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let uploader = Arc::new(Uploader::new(self.options.retry, self.options.dry_run));
        let latest = Arc::new(Mutex::new(start));
        let mut tasks = JoinSet::new();

        debug!("Dispatching {} clips with {} upload permits", clips.len(), permits);

        for clip in clips {
            // Acquired here so submission follows start-time order
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let source = Arc::clone(&source);
            let store = Arc::clone(&store);
            let uploader = Arc::clone(&uploader);
            let latest = Arc::clone(&latest);

            tasks.spawn(async move {
                let _permit = permit;
                let result = process_clip(&source, store.as_ref(), &uploader, &clip).await;
                match &result {
                    Ok(()) => {
                        let mut latest = latest.lock().await;
                        *latest = (*latest).max(clip.end_ms());
                    }
                    Err(e) => {
                        error!(clip = %clip.id, camera = %clip.camera_name, "Failed to process clip: {:#}", e);
                    }
                }
                result.is_ok()
            });
        }

        let mut uploaded = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => uploaded += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    error!("Clip task panicked: {}", e);
                    failed += 1;
                }
            }
        }

        let latest = *latest.lock().await;
        (uploaded, failed, latest)
    }
}

async fn process_clip(
    source: &ClipSource,
    store: &dyn ObjectStore,
    uploader: &Uploader,
    clip: &ClipMetadata,
) -> anyhow::Result<()> {
    let key = clip.object_key();
    debug!(clip = %clip.id, key = %key, "Processing clip");

    uploader
        .upload(store, &key, &clip.mime_type, || source.fetch(clip))
        .await
        .with_context(|| format!("clip {}", clip.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::RawClip;
    use crate::source::{Capability, MemoryDevice, MemoryRegistry};
    use crate::store::{BucketMetadata, LocalStore, ObjectWriter, PutOptions};
    use bytes::Bytes;
    use std::io;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    const MINUTE: i64 = 60_000;

    /// In-memory checkpoint that counts writes
    struct MemoryCheckpoint {
        value: std::sync::Mutex<Timestamp>,
        writes: AtomicU32,
    }

    impl MemoryCheckpoint {
        fn at(ts: Timestamp) -> Arc<Self> {
            Arc::new(Self {
                value: std::sync::Mutex::new(ts),
                writes: AtomicU32::new(0),
            })
        }

        fn value(&self) -> Timestamp {
            *self.value.lock().unwrap()
        }

        fn writes(&self) -> u32 {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl CheckpointStore for MemoryCheckpoint {
        async fn read(&self) -> Timestamp {
            self.value()
        }

        async fn write(&self, timestamp: Timestamp) -> io::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.value.lock().unwrap() = timestamp;
            Ok(())
        }
    }

    /// Store that tracks how many puts are in flight at once
    #[derive(Default)]
    struct SlowStore {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        puts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectStore for SlowStore {
        fn bucket(&self) -> &str {
            "slow"
        }

        async fn open_writer<'a>(
            &'a self,
            _key: &str,
            _opts: &PutOptions,
        ) -> anyhow::Result<Box<dyn ObjectWriter + 'a>> {
            anyhow::bail!("streaming not supported")
        }

        async fn put(&self, _key: &str, _data: Bytes, _opts: &PutOptions) -> anyhow::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn bucket_metadata(&self) -> anyhow::Result<BucketMetadata> {
            Ok(BucketMetadata::new("slow"))
        }
    }

    /// Factory that counts connections and can refuse them
    struct CountingFactory {
        store: Arc<dyn ObjectStore>,
        refuse: bool,
        connects: AtomicU32,
    }

    #[async_trait::async_trait]
    impl StoreFactory for CountingFactory {
        async fn connect(&self) -> Result<Arc<dyn ObjectStore>, BackupError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(BackupError::Config("bucket not configured".to_string()));
            }
            Ok(Arc::clone(&self.store))
        }
    }

    fn options() -> BackupOptions {
        BackupOptions {
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            ..Default::default()
        }
    }

    fn local_store() -> (TempDir, Arc<dyn ObjectStore>) {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "clips").unwrap();
        (dir, Arc::new(store))
    }

    fn backup(
        options: BackupOptions,
        device: &MemoryDevice,
        checkpoint: &Arc<MemoryCheckpoint>,
        store: Arc<dyn ObjectStore>,
    ) -> Backup {
        Backup::new(
            options,
            Arc::new(MemoryRegistry::new(vec![device.clone()])),
            Arc::clone(checkpoint) as Arc<dyn CheckpointStore>,
            Arc::new(store),
        )
    }

    #[tokio::test]
    async fn test_run_uploads_and_advances_to_latest_end() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("b", "Back", base + 20 * MINUTE, base + 21 * MINUTE), b"b".as_slice())
            .with_clip(RawClip::new("a", "Front", base + 10 * MINUTE, base + 11 * MINUTE), b"a".as_slice());
        let checkpoint = MemoryCheckpoint::at(base);
        let (dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert_eq!(report.clips_found, 2);
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.outcome, RunOutcome::Advanced { to: base + 21 * MINUTE });
        assert_eq!(checkpoint.value(), base + 21 * MINUTE);

        let raw = RawClip::new("a", "Front", base + 10 * MINUTE, base + 11 * MINUTE);
        let key = ClipMetadata::from_raw(raw).unwrap().object_key();
        assert!(key.starts_with("Front/"));
        assert_eq!(std::fs::read(dir.path().join(key)).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_no_new_clips_touches_nothing() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR");
        let checkpoint = MemoryCheckpoint::at(base);
        let factory = Arc::new(CountingFactory {
            store: Arc::new(SlowStore::default()),
            refuse: false,
            connects: AtomicU32::new(0),
        });
        let backup = Backup::new(
            options(),
            Arc::new(MemoryRegistry::new(vec![device.clone()])),
            Arc::clone(&checkpoint) as Arc<dyn CheckpointStore>,
            Arc::clone(&factory) as Arc<dyn StoreFactory>,
        );

        let report = backup.run().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::NoNewClips);
        assert_eq!(report.checkpoint_after, base);
        assert_eq!(checkpoint.writes(), 0);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_total_failure_does_not_advance() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("a", "front", base + MINUTE, base + 2 * MINUTE), b"a".as_slice())
            .with_clip(RawClip::new("b", "front", base + 3 * MINUTE, base + 4 * MINUTE), b"b".as_slice())
            .failing_fetch("a")
            .failing_fetch("b");
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.outcome, RunOutcome::Unchanged);
        assert_eq!(checkpoint.value(), base);
        assert_eq!(checkpoint.writes(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let base = now_ms() - 60 * MINUTE;
        let a_end = base + 2 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("a", "front", base + MINUTE, a_end), b"a".as_slice())
            .with_clip(RawClip::new("b", "side", base + 3 * MINUTE, base + 4 * MINUTE), b"b".as_slice())
            .failing_fetch("b");
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(device.fetch_count("a"), 1);
        assert_eq!(device.fetch_count("b"), 3);
        assert!(checkpoint.value() >= a_end);
    }

    #[tokio::test]
    async fn test_dropped_stream_is_fetched_again_in_the_same_run() {
        let base = now_ms() - 60 * MINUTE;
        let end = base + 2 * MINUTE;
        let media = vec![5u8; 200_000];
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("a", "front", base + MINUTE, end), media.clone())
            .interrupting("a", 1);
        let checkpoint = MemoryCheckpoint::at(base);
        let (dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(device.fetch_count("a"), 2);
        assert_eq!(checkpoint.value(), end);

        let key = ClipMetadata::from_raw(RawClip::new("a", "front", base + MINUTE, end))
            .unwrap()
            .object_key();
        assert_eq!(std::fs::read(dir.path().join(key)).unwrap(), media);
    }

    #[tokio::test]
    async fn test_stream_dropping_on_every_attempt_fails_the_clip() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("a", "front", base + MINUTE, base + 2 * MINUTE), vec![5u8; 200_000])
            .interrupting("a", 10);
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(device.fetch_count("a"), 3);
        assert_eq!(report.outcome, RunOutcome::Unchanged);
        assert_eq!(checkpoint.writes(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_never_regresses() {
        let base = now_ms() - 60 * MINUTE;
        // End time before the checkpoint, e.g. a clock-skewed record
        let device = MemoryDevice::video_clips("nvr", "NVR").with_clip(
            RawClip::new("skewed", "front", base + MINUTE, base - 10 * MINUTE),
            b"x".as_slice(),
        );
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.outcome, RunOutcome::Unchanged);
        assert_eq!(checkpoint.value(), base);
    }

    #[tokio::test]
    async fn test_no_capable_device_leaves_checkpoint() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::new("cam", "Porch").with_capability(Capability::Camera);
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();

        let err = backup(options(), &device, &checkpoint, store).run().await.unwrap_err();

        assert!(matches!(err, BackupError::NoCapableDevice(_)));
        assert_eq!(checkpoint.writes(), 0);
    }

    #[tokio::test]
    async fn test_listing_exhaustion_is_fatal() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR").failing_queries(5);
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();

        let err = backup(options(), &device, &checkpoint, store).run().await.unwrap_err();

        assert!(matches!(err, BackupError::Listing(_)));
        assert_eq!(device.query_count(), 3);
        assert_eq!(checkpoint.writes(), 0);
    }

    #[tokio::test]
    async fn test_store_error_surfaces_before_any_fetch() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("a", "front", base + MINUTE, base + 2 * MINUTE), b"a".as_slice());
        let checkpoint = MemoryCheckpoint::at(base);
        let factory = Arc::new(CountingFactory {
            store: Arc::new(SlowStore::default()),
            refuse: true,
            connects: AtomicU32::new(0),
        });
        let backup = Backup::new(
            options(),
            Arc::new(MemoryRegistry::new(vec![device.clone()])),
            Arc::clone(&checkpoint) as Arc<dyn CheckpointStore>,
            factory,
        );

        let err = backup.run().await.unwrap_err();

        assert!(matches!(err, BackupError::Config(_)));
        assert_eq!(device.fetch_count("a"), 0);
        assert_eq!(checkpoint.writes(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_permits() {
        let base = now_ms() - 60 * MINUTE;
        let mut device = MemoryDevice::video_clips("nvr", "NVR");
        for i in 0..8 {
            let start = base + i * MINUTE;
            device = device.with_clip(
                RawClip::new(&format!("c{}", i), "front", start, start + MINUTE / 2),
                b"x".as_slice(),
            );
        }
        let checkpoint = MemoryCheckpoint::at(base);
        let store = Arc::new(SlowStore::default());
        let opts = BackupOptions {
            max_concurrent_uploads: 2,
            ..options()
        };

        let report = backup(opts, &device, &checkpoint, Arc::clone(&store) as Arc<dyn ObjectStore>)
            .run()
            .await
            .unwrap();

        assert_eq!(report.uploaded, 8);
        assert_eq!(store.puts.load(Ordering::SeqCst), 8);
        assert!(store.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(checkpoint.value(), base + 7 * MINUTE + MINUTE / 2);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let base = now_ms() - 60 * MINUTE;
        let device = MemoryDevice::video_clips("nvr", "NVR")
            .with_clip(RawClip::new("a", "front", base + MINUTE, base + 2 * MINUTE), b"a".as_slice());
        let checkpoint = MemoryCheckpoint::at(base);
        let store = Arc::new(SlowStore::default());
        let opts = BackupOptions {
            dry_run: true,
            ..options()
        };

        let report = backup(opts, &device, &checkpoint, Arc::clone(&store) as Arc<dyn ObjectStore>)
            .run()
            .await
            .unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(
            report.outcome,
            RunOutcome::DryRun {
                would_advance_to: Some(base + 2 * MINUTE)
            }
        );
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
        assert_eq!(checkpoint.writes(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_ahead_of_clock_is_noop() {
        let device = MemoryDevice::video_clips("nvr", "NVR");
        let checkpoint = MemoryCheckpoint::at(now_ms() + 60 * MINUTE);
        let (_dir, store) = local_store();

        let report = backup(options(), &device, &checkpoint, store).run().await.unwrap();

        assert!(report.window.is_empty());
        assert_eq!(report.outcome, RunOutcome::NoNewClips);
        assert_eq!(device.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_leaves_checkpoint() {
        let base = now_ms() - 60 * MINUTE;
        // Every listing attempt fails, so the run spends its time in backoff
        let device = MemoryDevice::video_clips("nvr", "NVR").failing_queries(10);
        let checkpoint = MemoryCheckpoint::at(base);
        let (_dir, store) = local_store();
        let opts = BackupOptions {
            retry: RetryPolicy::new(10, Duration::from_secs(60)),
            run_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let err = backup(opts, &device, &checkpoint, store).run().await.unwrap_err();

        assert!(matches!(err, BackupError::DeadlineExceeded(d) if d == Duration::from_secs(30)));
        assert_eq!(checkpoint.writes(), 0);
    }
}
