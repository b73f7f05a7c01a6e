//! Runtime configuration
//!
//! Built once at startup from the process environment and passed by value
//! into the components. Unparseable values fall back to their defaults.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::BackupOptions;
use crate::error::BackupError;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::source::{CameraFilter, RegistryConfig};
use crate::store::{S3StoreConfig, StoreConfig};

pub const DEFAULT_STATE_FILE: &str = "./backup-state.json";
pub const DEFAULT_LOCAL_STORE_PATH: &str = "./backup-bucket";
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Log verbosity for the crate's own targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; anything unrecognized is `Info`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    /// Filter directive form
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub state_file: PathBuf,
    pub registry: RegistryConfig,
    pub store: StoreConfig,
    pub log_level: LogLevel,
    pub max_concurrent_uploads: usize,
    pub filter: CameraFilter,
    pub dry_run: bool,
    pub retry: RetryPolicy,
    pub run_timeout: Option<Duration>,
    pub lifecycle_retention_days: u32,
}

fn parse_bool(v: &str) -> bool {
    let v = v.trim();
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl Config {
    pub fn from_env() -> Result<Self, BackupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BackupError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let state_file = var("STATE_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        let defaults = RegistryConfig::default();
        let registry = RegistryConfig {
            host: var("SCRYPTED_HOST").unwrap_or(defaults.host),
            username: var("SCRYPTED_USER"),
            password: var("SCRYPTED_PASSWORD"),
            allow_self_signed: var("ALLOW_SELF_SIGNED")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
        };

        let store = match var("OBJECT_STORE")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("gcs") | Some("s3") => {
                let defaults = S3StoreConfig::default();
                StoreConfig::S3(S3StoreConfig {
                    project_id: var("GCS_PROJECT_ID"),
                    bucket: var("GCS_BUCKET_NAME"),
                    keyfile: var("GCS_KEYFILE_PATH").map(PathBuf::from),
                    endpoint_url: var("GCS_ENDPOINT_URL").unwrap_or(defaults.endpoint_url),
                    region: var("GCS_REGION").unwrap_or(defaults.region),
                })
            }
            Some("local") => {
                let root = var("LOCAL_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORE_PATH));
                let bucket = var("GCS_BUCKET_NAME").unwrap_or_else(|| {
                    root.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "local".to_string())
                });
                StoreConfig::Local { root, bucket }
            }
            Some(other) => {
                return Err(BackupError::Config(format!(
                    "unknown OBJECT_STORE '{}' (expected gcs or local)",
                    other
                )))
            }
        };

        let log_level = var("LOG_LEVEL")
            .map(|v| LogLevel::parse(&v))
            .unwrap_or_default();

        let max_concurrent_uploads = var("MAX_CONCURRENT_UPLOADS")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOADS);

        let filter = CameraFilter::from_lists(
            &var("CAMERA_INCLUDE_LIST").unwrap_or_default(),
            &var("CAMERA_EXCLUDE_LIST").unwrap_or_default(),
        );

        let dry_run = var("DRY_RUN").map(|v| parse_bool(&v)).unwrap_or(false);

        let retry = RetryPolicy::new(
            var("RETRY_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            var("RETRY_BASE_DELAY_MS")
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BASE_DELAY),
        );

        let run_timeout = var("RUN_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let lifecycle_retention_days = var("LIFECYCLE_RETENTION_DAYS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        Ok(Self {
            state_file,
            registry,
            store,
            log_level,
            max_concurrent_uploads,
            filter,
            dry_run,
            retry,
            run_timeout,
            lifecycle_retention_days,
        })
    }

    /// Orchestrator settings derived from this configuration.
    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            filter: self.filter.clone(),
            max_concurrent_uploads: self.max_concurrent_uploads,
            retry: self.retry,
            dry_run: self.dry_run,
            run_timeout: self.run_timeout,
        }
    }
}
