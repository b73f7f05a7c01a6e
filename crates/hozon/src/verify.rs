//! Deployment verification
//!
//! Checks that a configured deployment can run: the registry is reachable
//! and has a clip-serving device, the bucket is reachable, the bucket
//! deletes objects after the retention period, and a full dry-run backup
//! completes. Each check runs even when an earlier one failed.

use std::fmt;
use std::io;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, error, info, warn};

use crate::backup::{Backup, BackupOptions, RunOutcome};
use crate::checkpoint::CheckpointStore;
use crate::clip::Timestamp;
use crate::config::DEFAULT_RETENTION_DAYS;
use crate::source::{Capability, DeviceRegistry};
use crate::store::{BucketMetadata, StoreFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Registry,
    Store,
    Lifecycle,
    DryRun,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Check::Registry => "device registry connection",
            Check::Store => "object store connection",
            Check::Lifecycle => "bucket lifecycle policy",
            Check::DryRun => "dry-run backup",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub check: Check,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn get(&self, check: Check) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }

    fn record(&mut self, check: Check, result: Result<String>) {
        let (passed, detail) = match result {
            Ok(detail) => {
                info!("PASS {}: {}", check, detail);
                (true, detail)
            }
            Err(e) => {
                error!("FAIL {}: {:#}", check, e);
                (false, format!("{:#}", e))
            }
        };
        self.checks.push(CheckResult {
            check,
            passed,
            detail,
        });
    }
}

/// Checkpoint view that never persists anything.
struct ReadOnlyCheckpoint(Arc<dyn CheckpointStore>);

#[async_trait::async_trait]
impl CheckpointStore for ReadOnlyCheckpoint {
    async fn read(&self) -> Timestamp {
        self.0.read().await
    }

    async fn write(&self, timestamp: Timestamp) -> io::Result<()> {
        debug!("Verification run: not persisting checkpoint {}", timestamp);
        Ok(())
    }
}

pub struct Verifier {
    registry: Arc<dyn DeviceRegistry>,
    checkpoint: Arc<dyn CheckpointStore>,
    stores: Arc<dyn StoreFactory>,
    options: BackupOptions,
    retention_days: u32,
}

impl Verifier {
    pub fn new(
        options: BackupOptions,
        registry: Arc<dyn DeviceRegistry>,
        checkpoint: Arc<dyn CheckpointStore>,
        stores: Arc<dyn StoreFactory>,
    ) -> Self {
        Self {
            registry,
            checkpoint,
            stores,
            options,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Age in days at which the bucket must delete objects
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Run every check.
    pub async fn run(&self) -> VerifyReport {
        info!("Starting deployment verification");
        let mut report = VerifyReport::default();

        report.record(Check::Registry, self.check_registry().await);

        let metadata = self.check_store().await;
        let lifecycle = match &metadata {
            Ok(meta) => self.check_lifecycle(meta),
            Err(_) => Err(anyhow!("bucket metadata unavailable")),
        };
        report.record(
            Check::Store,
            metadata.map(|m| format!("bucket {} reachable", m.name)),
        );
        report.record(Check::Lifecycle, lifecycle);

        report.record(Check::DryRun, self.dry_run().await);

        if report.all_passed() {
            info!("All verification checks passed");
        } else {
            warn!(
                "{} of {} verification checks failed",
                report.failed().count(),
                report.checks.len()
            );
        }
        report
    }

    async fn check_registry(&self) -> Result<String> {
        let devices = self.registry.capable_devices(&Capability::VideoClips).await?;
        if devices.is_empty() {
            bail!("no {} device found in registry", Capability::VideoClips);
        }
        Ok(format!("found {} {} devices", devices.len(), Capability::VideoClips))
    }

    async fn check_store(&self) -> Result<BucketMetadata> {
        let store = self.stores.connect().await?;
        store.bucket_metadata().await
    }

    fn check_lifecycle(&self, meta: &BucketMetadata) -> Result<String> {
        if meta.lifecycle.is_empty() {
            bail!("no lifecycle rules on bucket {}", meta.name);
        }
        if !meta.has_delete_rule(self.retention_days) {
            bail!(
                "no rule deletes objects after {} days on bucket {}",
                self.retention_days,
                meta.name
            );
        }
        Ok(format!(
            "objects are deleted after {} days",
            self.retention_days
        ))
    }

    async fn dry_run(&self) -> Result<String> {
        let options = BackupOptions {
            dry_run: true,
            ..self.options.clone()
        };
        let backup = Backup::new(
            options,
            Arc::clone(&self.registry),
            Arc::new(ReadOnlyCheckpoint(Arc::clone(&self.checkpoint))),
            Arc::clone(&self.stores),
        );
        let report = backup.run().await?;
        Ok(match report.outcome {
            RunOutcome::NoNewClips => "no new clips to back up".to_string(),
            _ => format!(
                "{} clips found, {} would upload, {} failed",
                report.clips_found, report.uploaded, report.failed
            ),
        })
    }
}
