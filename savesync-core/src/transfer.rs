//! Remote transfer boundary.
//!
//! Remote endpoints are reached only through an external copy tool. The
//! engine talks to it through [`RemoteTransfer`]; [`Rclone`] is the
//! production implementation.

use crate::errors::TransferError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, info};

/// One file reported by a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// List and copy operations on `remote:path` or bare local specs.
#[async_trait]
pub trait RemoteTransfer: Send + Sync {
    /// Recursively list the files under `spec`.
    async fn list(&self, spec: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    /// Copy the tree at `source` into `destination`.
    ///
    /// Copy-only: files are added or overwritten, destination-only files
    /// are never removed.
    async fn copy(&self, source: &str, destination: &str) -> Result<(), TransferError>;
}

/// Latest modification time among `entries`, or the epoch when empty.
pub fn latest_entry_time(entries: &[RemoteEntry]) -> SystemTime {
    entries
        .iter()
        .map(|e| e.modified)
        .max()
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Transfer used when no endpoint is remote; every call reports the copy
/// tool as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteTransfer;

#[async_trait]
impl RemoteTransfer for NoRemoteTransfer {
    async fn list(&self, _spec: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        Err(TransferError::ToolMissing)
    }

    async fn copy(&self, _source: &str, _destination: &str) -> Result<(), TransferError> {
        Err(TransferError::ToolMissing)
    }
}

// ── rclone ───────────────────────────────────────────────────────────────

/// Settings for invoking rclone.
#[derive(Debug, Clone)]
pub struct RcloneOptions {
    /// Explicit binary; otherwise looked up next to our executable, then PATH.
    pub binary: Option<PathBuf>,
    /// `--config` file passed to every invocation.
    pub config_path: PathBuf,
    /// `--retries` passed to copies.
    pub retries: u32,
    /// Discard rclone's own output instead of streaming it.
    pub quiet: bool,
}

/// Production [`RemoteTransfer`] backed by the rclone CLI.
#[derive(Debug, Clone)]
pub struct Rclone {
    binary: PathBuf,
    config_path: PathBuf,
    retries: u32,
    quiet: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsjsonItem {
    path: String,
    name: String,
    #[serde(default)]
    size: i64,
    mod_time: DateTime<Utc>,
    #[serde(default)]
    is_dir: bool,
}

impl Rclone {
    pub fn new(options: RcloneOptions) -> Result<Self, TransferError> {
        let binary = match options.binary {
            Some(binary) => binary,
            None => locate_rclone()?,
        };
        Ok(Self {
            binary,
            config_path: options.config_path,
            retries: options.retries,
            quiet: options.quiet,
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--config").arg(&self.config_path);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Names of the remotes configured in the rclone config file.
    pub async fn list_remotes(&self) -> Result<Vec<String>, TransferError> {
        let mut cmd = self.base_command();
        cmd.arg("listremotes");
        let output = cmd.output().await.map_err(|source| TransferError::Spawn {
            program: self.binary.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(TransferError::Failed {
                command: "rclone listremotes".to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_listremotes(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Run the interactive `rclone config` wizard on the current terminal.
    pub async fn run_config_wizard(&self) -> Result<(), TransferError> {
        let status = Command::new(&self.binary)
            .arg("config")
            .arg("--config")
            .arg(&self.config_path)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| TransferError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(TransferError::Failed {
                command: "rclone config".to_string(),
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}

#[async_trait]
impl RemoteTransfer for Rclone {
    async fn list(&self, spec: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let mut cmd = self.base_command();
        cmd.args(["lsjson", "--recursive", "--files-only", spec]);
        debug!("Listing {}", spec);

        let output = cmd.output().await.map_err(|source| TransferError::Spawn {
            program: self.binary.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Err(TransferError::NotFound(spec.to_string()));
            }
            return Err(TransferError::Failed {
                command: format!("rclone lsjson {spec}"),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_lsjson(spec, &output.stdout)
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), TransferError> {
        let mut cmd = self.base_command();
        cmd.arg("--retries").arg(self.retries.to_string());
        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.arg("--progress");
        }
        cmd.args(["copy", source, destination]);

        info!("Executing: rclone copy {} {}", source, destination);
        let status = cmd.status().await.map_err(|source| TransferError::Spawn {
            program: self.binary.display().to_string(),
            source,
        })?;

        if status.success() {
            debug!("rclone copy completed successfully");
            Ok(())
        } else {
            Err(TransferError::Failed {
                command: format!("rclone copy {source} {destination}"),
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}

fn rclone_file_name() -> &'static str {
    if cfg!(windows) { "rclone.exe" } else { "rclone" }
}

/// rclone next to our own executable wins over one in PATH.
fn locate_rclone() -> Result<PathBuf, TransferError> {
    if let Some(local) = bundled_rclone_path()
        && local.is_file()
    {
        return Ok(local);
    }
    which::which("rclone").map_err(|_| TransferError::ToolMissing)
}

/// Where a bundled rclone would sit: beside the running executable.
pub fn bundled_rclone_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(rclone_file_name())))
}

fn is_not_found(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("directory not found")
}

fn parse_lsjson(spec: &str, stdout: &[u8]) -> Result<Vec<RemoteEntry>, TransferError> {
    let items: Vec<LsjsonItem> =
        serde_json::from_slice(stdout).map_err(|e| TransferError::Parse {
            spec: spec.to_string(),
            reason: e.to_string(),
        })?;
    Ok(items
        .into_iter()
        .filter(|item| !item.is_dir)
        .map(|item| RemoteEntry {
            path: item.path,
            name: item.name,
            size: u64::try_from(item.size).unwrap_or(0),
            modified: SystemTime::from(item.mod_time),
        })
        .collect())
}

fn parse_listremotes(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_suffix(':'))
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
