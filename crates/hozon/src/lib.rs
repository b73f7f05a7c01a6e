//! Hozon - incremental backup of NVR video clips to object storage
//!
//! Each run copies clips recorded since the last successful run from a
//! device registry to a bucket, then advances a persisted checkpoint.
//!
//! - **Clip model**: clip records, run windows, deterministic object keys
//! - **`checkpoint`**: persisted high-water mark (JSON file, atomic replace)
//! - **`source`**: device registry (HTTP or in-memory), capability lookup,
//!   camera filtering
//! - **`store`**: object stores (S3-compatible / GCS interoperability, local
//!   directory)
//! - **`upload`**: stream or buffer upload with retry
//! - **`backup`**: the run orchestrator
//! - **`verify`**: deployment checks (connectivity, lifecycle, dry run)

pub mod backup;
pub mod checkpoint;
pub mod clip;
pub mod config;
pub mod error;
pub mod retry;
pub mod source;
pub mod store;
pub mod upload;
pub mod verify;

pub use backup::{Backup, BackupOptions, RunOutcome, RunReport, RunState};
pub use checkpoint::{CheckpointStore, FileCheckpoint};
pub use clip::{ClipMetadata, RawClip, RunWindow, Timestamp};
pub use config::{Config, LogLevel};
pub use error::{BackupError, RetryExhausted};
pub use retry::RetryPolicy;
pub use source::{Capability, ClipSource, Device, DeviceRegistry, HttpRegistry};
pub use store::{ObjectStore, StoreConfig, StoreFactory};
pub use upload::{Payload, Uploader};
pub use verify::{Check, CheckResult, VerifyReport, Verifier};
