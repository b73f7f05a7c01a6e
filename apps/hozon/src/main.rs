//! Hozon: scheduled NVR clip backup
//!
//! Copies clips recorded since the last run from the NVR to the configured
//! bucket. Meant to be run from cron or a systemd timer; every run is a
//! single pass that exits when done.
//!
//! ## Usage
//!
//! ```bash
//! # Back up new clips to Google Cloud Storage
//! GCS_PROJECT_ID=my-project GCS_BUCKET_NAME=nvr-backup \
//!   GCS_KEYFILE_PATH=/etc/hozon/hmac.json hozon
//!
//! # Check connectivity, bucket lifecycle and do a dry run
//! hozon verify
//!
//! # Back up into a local directory instead
//! OBJECT_STORE=local LOCAL_STORE_PATH=/srv/nvr-backup hozon backup
//! ```
//!
//! ## Key file
//!
//! The bucket is reached through the S3-compatible XML API, so
//! `GCS_KEYFILE_PATH` points at an HMAC key, not a service-account JSON key.
//! Deployments that used a service-account key need an HMAC key created for
//! that service account (`gcloud storage hmac create SA_EMAIL`) and a file:
//!
//! ```json
//! {"access_key_id": "GOOG1E...", "secret_access_key": "..."}
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hozon::clip::format_ms;
use hozon::{
    Backup, BackupError, Config, FileCheckpoint, HttpRegistry, LogLevel, RunOutcome, Verifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Backup,
    Verify,
}

impl Mode {
    /// First argument, else `HOZON_MODE`, else backup.
    fn from_args() -> Result<Self> {
        let arg = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("HOZON_MODE").ok());
        match arg.as_deref().map(str::trim) {
            None | Some("") | Some("backup") => Ok(Mode::Backup),
            Some("verify") => Ok(Mode::Verify),
            Some(other) => bail!("unknown mode '{}' (expected backup or verify)", other),
        }
    }
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,hozon={}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogLevel::Info);
            error!("{}", e);
            std::process::exit(1);
        }
    };
    init_logging(config.log_level);

    let mode = Mode::from_args()?;
    let ok = match mode {
        Mode::Backup => run_backup(&config).await,
        Mode::Verify => run_verify(&config).await,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn components(
    config: &Config,
) -> Result<(Arc<HttpRegistry>, Arc<FileCheckpoint>), BackupError> {
    let registry = HttpRegistry::connect(&config.registry).map_err(BackupError::Registry)?;
    let checkpoint = FileCheckpoint::new(&config.state_file);
    Ok((Arc::new(registry), Arc::new(checkpoint)))
}

async fn run_backup(config: &Config) -> bool {
    info!("Hozon backup starting");
    info!("  State file: {:?}", config.state_file);
    info!("  Registry: {}", config.registry.host);
    info!("  Max concurrent uploads: {}", config.max_concurrent_uploads);
    if config.dry_run {
        warn!("  DRY RUN: nothing will be uploaded");
    }

    let (registry, checkpoint) = match components(config) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return false;
        }
    };

    let backup = Backup::new(
        config.backup_options(),
        registry,
        checkpoint,
        Arc::new(config.store.clone()),
    );

    // Failures are logged by the orchestrator
    let Ok(report) = backup.run().await else {
        return false;
    };

    match report.outcome {
        RunOutcome::NoNewClips => info!(
            "No new clips since {}",
            format_ms(report.checkpoint_before)
        ),
        _ => info!(
            "Run finished: {} clips found, {} uploaded, {} failed",
            report.clips_found, report.uploaded, report.failed
        ),
    }
    true
}

async fn run_verify(config: &Config) -> bool {
    info!("Hozon verification starting");

    let (registry, checkpoint) = match components(config) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return false;
        }
    };

    let verifier = Verifier::new(
        config.backup_options(),
        registry,
        checkpoint,
        Arc::new(config.store.clone()),
    )
    .with_retention_days(config.lifecycle_retention_days);

    let report = verifier.run().await;
    for check in &report.checks {
        let status = if check.passed { "PASS" } else { "FAIL" };
        println!("{:<4}  {:<28} {}", status, check.check.to_string(), check.detail);
    }
    report.all_passed()
}
