//! Error types for the session engine.
//!
//! | Variant            | Phase              | Fatal |
//! |--------------------|--------------------|-------|
//! | `Config`           | before session     | yes   |
//! | `LockContention`   | acquiring lock     | yes   |
//! | `Lock`             | acquiring lock     | yes   |
//! | `NoReachableSource`| preparing          | yes   |
//! | `EnvironmentSetup` | preparing          | yes   |
//! | `Launch`           | launching          | yes   |
//! | `Sync`             | running / draining | no    |
//! | `Teardown`         | teardown           | no    |

use std::path::PathBuf;
use thiserror::Error;

/// Failures at the external copy tool boundary.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The remote path does not exist.
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// The copy tool binary could not be located.
    #[error("rclone not found next to the executable or in PATH")]
    ToolMissing,

    /// The copy tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The copy tool ran and reported failure.
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The copy tool produced output we could not understand.
    #[error("failed to parse listing for {spec}: {reason}")]
    Parse { spec: String, reason: String },
}

/// Underlying cause of a failed synchronization.
#[derive(Debug, Error)]
pub enum SyncFailure {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("copy task aborted: {0}")]
    Join(String),
}

/// A synchronization between two endpoints failed.
#[derive(Debug, Error)]
#[error("sync '{source_label}' -> '{destination_label}' failed: {failure}")]
pub struct SyncError {
    pub source_label: String,
    pub destination_label: String,
    #[source]
    pub failure: SyncFailure,
}

impl SyncError {
    pub fn new(
        source_label: impl Into<String>,
        destination_label: impl Into<String>,
        failure: impl Into<SyncFailure>,
    ) -> Self {
        Self {
            source_label: source_label.into(),
            destination_label: destination_label.into(),
            failure: failure.into(),
        }
    }
}

/// Errors surfaced by a launch session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed endpoint specification or configuration value.
    #[error("invalid configuration '{input}': {reason}")]
    Config { input: String, reason: String },

    /// Another live session holds the instance lock.
    #[error("another session (PID {pid}) holds the lock at {}", path.display())]
    LockContention { pid: u32, path: PathBuf },

    /// The lock file could not be read or written.
    #[error("lock file {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// None of the configured endpoints could be inspected.
    #[error("no reachable save source among {checked} endpoint(s)")]
    NoReachableSource { checked: usize },

    /// Preparing the working location failed; partial changes were reverted.
    #[error("environment setup failed: {context}")]
    EnvironmentSetup {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The managed executable is missing or could not be started.
    #[error("failed to launch {}: {source}", executable.display())]
    Launch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Cleanup or restore failed after the session completed.
    #[error("teardown failed: {context}: {source}")]
    Teardown {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn config(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn setup(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::EnvironmentSetup {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Whether this error aborts the run.
    ///
    /// Everything that happens before the managed process starts is fatal;
    /// background and teardown failures are downgraded to warnings.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Sync(_) | Self::Teardown { .. })
    }
}
