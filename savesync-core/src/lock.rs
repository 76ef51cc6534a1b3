//! Single-session instance lock.
//!
//! A PID lock file: the holder writes its process id, and a later session
//! reclaims the file when that process is gone. Liveness probing is behind
//! [`ProcessLiveness`] so the lock logic stays platform independent.

use crate::errors::SessionError;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Result of probing a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The platform could not tell.
    Unknown,
}

pub trait ProcessLiveness: Send + Sync {
    fn probe(&self, pid: u32) -> Liveness;
}

/// Liveness probe for the host OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLiveness;

impl ProcessLiveness for SystemLiveness {
    fn probe(&self, pid: u32) -> Liveness {
        #[cfg(target_os = "linux")]
        {
            if Path::new(&format!("/proc/{pid}")).exists() {
                Liveness::Alive
            } else {
                Liveness::Dead
            }
        }

        #[cfg(target_os = "macos")]
        {
            // ps exits non-zero when the pid does not exist
            match std::process::Command::new("ps")
                .args(["-p", &pid.to_string()])
                .output()
            {
                Ok(output) if output.status.success() => Liveness::Alive,
                Ok(_) => Liveness::Dead,
                Err(_) => Liveness::Unknown,
            }
        }

        #[cfg(windows)]
        {
            let filter = format!("PID eq {pid}");
            match std::process::Command::new("tasklist")
                .args(["/FI", &filter, "/NH", "/FO", "CSV"])
                .output()
            {
                Ok(output) if output.status.success() => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if stdout.contains(&format!("\"{pid}\"")) {
                        Liveness::Alive
                    } else {
                        Liveness::Dead
                    }
                }
                _ => Liveness::Unknown,
            }
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
        {
            let _ = pid;
            Liveness::Unknown
        }
    }
}

/// How long an empty lock file counts as a lock still being written.
const LOCK_WRITE_GRACE: Duration = Duration::from_secs(5);

fn recently_modified(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age < LOCK_WRITE_GRACE)
}

/// Exclusive lock held for the lifetime of a session.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Acquire the lock at `path`.
    ///
    /// An existing lock whose holder is alive (or cannot be probed) is
    /// contention. A lock naming a dead process, or holding anything that
    /// is not a PID, is stale and gets reclaimed. The file is only ever
    /// created with `create_new`, so two sessions cannot both win it.
    pub fn acquire(path: &Path, liveness: &dyn ProcessLiveness) -> Result<Self, SessionError> {
        let lock_err = |source| SessionError::Lock {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }

        // Two passes: the second runs after a stale lock was removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(lock_err)?;
                    file.sync_all().map_err(lock_err)?;
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(lock_err(e)),
            }

            let contents = match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(lock_err(e)),
            };
            match contents.trim().parse::<u32>() {
                Ok(pid) => match liveness.probe(pid) {
                    Liveness::Alive | Liveness::Unknown => {
                        return Err(SessionError::LockContention {
                            pid,
                            path: path.to_path_buf(),
                        });
                    }
                    Liveness::Dead => {
                        warn!("Reclaiming stale lock {} held by dead PID {}", path.display(), pid);
                    }
                },
                Err(_) if contents.trim().is_empty() && recently_modified(path) => {
                    // Another session created the file and has not written its PID yet.
                    return Err(lock_err(std::io::Error::new(
                        ErrorKind::WouldBlock,
                        "lock is being taken by another session",
                    )));
                }
                Err(_) => warn!("Reclaiming unreadable lock {}", path.display()),
            }
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(lock_err(e)),
            }
        }

        Err(lock_err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "lock was re-created while reclaiming it",
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Released lock {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove lock {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.remove();
    }
}
