//! In-process stand-in for the remote copy tool.
//!
//! Each registered remote name maps to a local directory, so `gdrive:/saves`
//! resolves to `<root>/saves`. Copies keep rclone's copy-only semantics and
//! every call is recorded for later assertions. Used by unit and integration
//! tests where a real rclone is unavailable.

use crate::errors::TransferError;
use crate::fsutil;
use crate::transfer::{RemoteEntry, RemoteTransfer};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCall {
    List(String),
    Copy { source: String, destination: String },
}

#[derive(Debug, Default)]
pub struct MockTransfer {
    remotes: HashMap<String, PathBuf>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<TransferCall>>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back remote `name` with the local directory `root`.
    pub fn with_remote(mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.remotes.insert(name.into(), root.into());
        self
    }

    /// Make every call touching remote `name` fail until [`Self::recover`].
    pub fn fail_remote(&self, name: &str) {
        lock(&self.failing).insert(name.to_string());
    }

    pub fn recover(&self, name: &str) {
        lock(&self.failing).remove(name);
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        lock(&self.calls).clone()
    }

    /// Recorded copies as `(source, destination)` pairs.
    pub fn copies(&self) -> Vec<(String, String)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                TransferCall::Copy {
                    source,
                    destination,
                } => Some((source.clone(), destination.clone())),
                TransferCall::List(_) => None,
            })
            .collect()
    }

    fn resolve(&self, spec: &str) -> Result<PathBuf, TransferError> {
        let Some((name, path)) = spec.split_once(':') else {
            return Ok(PathBuf::from(spec));
        };
        let Some(root) = self.remotes.get(name) else {
            // Drive letters and other unknown prefixes are plain local paths.
            return Ok(PathBuf::from(spec));
        };
        if lock(&self.failing).contains(name) {
            return Err(TransferError::Failed {
                command: format!("mock {spec}"),
                status: "exit status: 1".to_string(),
                stderr: format!("remote {name} is unavailable"),
            });
        }
        Ok(root.join(path.trim_start_matches(['/', '\\'])))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn list_dir(spec: &str, dir: &Path) -> Result<Vec<RemoteEntry>, TransferError> {
    if !dir.is_dir() {
        return Err(TransferError::NotFound(spec.to_string()));
    }
    let io_err = |e: std::io::Error| TransferError::Failed {
        command: format!("mock lsjson {spec}"),
        status: "exit status: 1".to_string(),
        stderr: e.to_string(),
    };
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| io_err(e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let meta = entry.metadata().map_err(|e| io_err(e.into()))?;
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        entries.push(RemoteEntry {
            path: rel.to_string_lossy().replace('\\', "/"),
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            modified: meta.modified().map_err(io_err)?,
        });
    }
    Ok(entries)
}

#[async_trait]
impl RemoteTransfer for MockTransfer {
    async fn list(&self, spec: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        lock(&self.calls).push(TransferCall::List(spec.to_string()));
        let dir = self.resolve(spec)?;
        list_dir(spec, &dir)
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), TransferError> {
        lock(&self.calls).push(TransferCall::Copy {
            source: source.to_string(),
            destination: destination.to_string(),
        });
        let src = self.resolve(source)?;
        let dest = self.resolve(destination)?;
        if !src.is_dir() {
            return Err(TransferError::NotFound(source.to_string()));
        }
        let command = format!("mock copy {source} {destination}");
        tokio::task::spawn_blocking(move || fsutil::copy_dir_recursive(&src, &dest))
            .await
            .map_err(|e| TransferError::Failed {
                command: command.clone(),
                status: "aborted".to_string(),
                stderr: e.to_string(),
            })?
            .map_err(|e| TransferError::Failed {
                command,
                status: "exit status: 1".to_string(),
                stderr: e.to_string(),
            })
    }
}
