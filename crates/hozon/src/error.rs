//! Run-level error taxonomy
//!
//! Components return `anyhow::Result` internally. Anything that ends a run
//! is converted into a [`BackupError`] at the orchestrator boundary so the
//! caller can tell configuration problems from transient outages.

use std::time::Duration;

use crate::source::Capability;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Missing or invalid settings, detected before any upload.
    #[error("configuration error: {0}")]
    Config(String),

    /// The registry has no device exposing the requested capability.
    #[error("no device with capability '{0}' found in registry")]
    NoCapableDevice(Capability),

    /// The registry could not be reached while discovering devices.
    #[error("device registry unavailable: {0:#}")]
    Registry(anyhow::Error),

    /// Listing clips failed after all retries.
    #[error("clip listing failed: {0:#}")]
    Listing(anyhow::Error),

    /// The object store handle could not be constructed.
    #[error("object store unavailable: {0:#}")]
    Store(anyhow::Error),

    /// Persisting the new checkpoint failed. The previous value is intact.
    #[error("failed to write checkpoint: {0}")]
    CheckpointWrite(#[source] std::io::Error),

    /// The optional run deadline elapsed before the run settled.
    #[error("backup run exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Returned by the retry executor once every attempt has failed.
#[derive(Debug, thiserror::Error)]
#[error("{label} failed after {attempts} attempts: {last:#}")]
pub struct RetryExhausted {
    pub label: String,
    pub attempts: u32,
    pub last: anyhow::Error,
}
