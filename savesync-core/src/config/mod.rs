//! Configuration for savesync.
//!
//! This module provides:
//! - Endpoint spec parsing (`path[|interval_seconds[|sync_on_exit]]`)
//! - The optional TOML config file
//! - Environment variable parsing with type safety

pub mod env;

pub use env::{EnvError, EnvParser, LOG_LEVELS};

use crate::errors::SessionError;
use crate::types::{Endpoint, SyncOnExit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default debounce for watch-mode endpoints.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Default retry count passed to rclone.
pub const DEFAULT_RCLONE_RETRIES: u32 = 5;

// ── Endpoint specs ───────────────────────────────────────────────────────

/// Parse one endpoint spec: `path[|interval_seconds[|sync_on_exit_bool]]`.
///
/// A path is remote when it has a `name:` prefix whose name is longer than
/// one character and contains no path separator, so `C:\saves` and
/// `D:/saves` stay local.
pub fn parse_endpoint_spec(raw: &str) -> Result<Endpoint, SessionError> {
    let mut parts = raw.split('|');
    let path_part = parts.next().unwrap_or_default().trim();
    let interval_part = parts.next().map(str::trim);
    let quit_part = parts.next().map(str::trim);

    if parts.next().is_some() {
        return Err(SessionError::config(raw, "too many '|' separated fields"));
    }
    if path_part.is_empty() {
        return Err(SessionError::config(raw, "empty path"));
    }

    let mut endpoint = match split_remote(path_part) {
        Some((remote, path)) => Endpoint::remote(remote, path, raw),
        None => Endpoint::local(path_part, raw),
    };

    if let Some(interval) = interval_part.filter(|s| !s.is_empty()) {
        let seconds: u64 = interval.parse().map_err(|_| {
            SessionError::config(
                raw,
                format!("interval '{interval}' is not a non-negative number of seconds"),
            )
        })?;
        endpoint = endpoint.with_interval(Duration::from_secs(seconds));
    }

    if let Some(flag) = quit_part.filter(|s| !s.is_empty()) {
        let value = parse_bool(flag).ok_or_else(|| {
            SessionError::config(raw, format!("sync-on-exit flag '{flag}' is not a boolean"))
        })?;
        endpoint = endpoint.with_sync_on_exit(SyncOnExit::from(value));
    }

    Ok(endpoint)
}

fn split_remote(path: &str) -> Option<(&str, &str)> {
    let (name, rest) = path.split_once(':')?;
    let is_remote = name.chars().count() > 1 && !name.contains(['\\', '/']);
    is_remote.then_some((name, rest))
}

/// Parse a boolean the way the endpoint spec and config accept it.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Config file ──────────────────────────────────────────────────────────

/// Contents of `config.toml`. Every field is optional so the file can be
/// partial; the CLI layers environment variables and flags on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub rclone: RcloneSection,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    /// Managed executable.
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Installation directory, used as the process working directory.
    pub install_path: Option<PathBuf>,
    /// The user's real save location.
    pub data_path: Option<PathBuf>,
    /// Home directory to redirect when sandboxing. Defaults to the user's.
    pub home_dir: Option<PathBuf>,
    pub isolate: Option<bool>,
    pub lock_file: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    /// Default sync-on-exit for non-primary endpoints.
    pub sync_on_exit: Option<bool>,
    /// Endpoint specs in registry order.
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RcloneSection {
    pub binary: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub retries: Option<u32>,
}

impl FileConfig {
    /// Default location: `<config dir>/savesync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("savesync").join("config.toml"))
    }

    /// Load a config file. A missing file yields the empty config.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(SessionError::config(
                    path.display().to_string(),
                    e.to_string(),
                ));
            }
        };
        Self::parse(&content).map_err(|reason| SessionError::config(path.display().to_string(), reason))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        for spec in &config.session.targets {
            parse_endpoint_spec(spec).map_err(|e| e.to_string())?;
        }
        Ok(config)
    }
}

/// Default lock location: `<data dir>/savesync/session.lock`.
pub fn default_lock_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("savesync").join("session.lock"))
}
