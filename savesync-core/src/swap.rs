//! Transactional swap of the real data location.
//!
//! Used when isolation is off: the real data directory is moved aside to
//! `<data>.savesync-backup`, repopulated from the freshest endpoint, and
//! moved back when the session ends. Callers hold the instance lock for the
//! whole swap.

use crate::errors::SessionError;
use crate::fsutil;
use crate::synchronizer::Synchronizer;
use crate::types::Endpoint;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const BACKUP_SUFFIX: &str = ".savesync-backup";
const UNSYNCED_SUFFIX: &str = ".savesync-unsynced-";

#[derive(Debug)]
pub struct SwapController {
    data_path: PathBuf,
    backup_path: PathBuf,
    backed_up: bool,
}

impl SwapController {
    pub fn new(data_path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let data_path = data_path.into();
        let backup_path = sibling(&data_path, BACKUP_SUFFIX).ok_or_else(|| {
            SessionError::config(
                data_path.display().to_string(),
                "data path has no final component",
            )
        })?;
        Ok(Self {
            data_path,
            backup_path,
            backed_up: false,
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn working_endpoint(&self) -> Endpoint {
        Endpoint::local(&self.data_path, "session")
    }

    /// Restore a backup left behind by a session that never tore down.
    ///
    /// Whatever sits at the data path is preserved as unsynced progress
    /// first. Returns whether a backup was found.
    pub fn recover(&self) -> Result<bool, SessionError> {
        if !self.backup_path.exists() {
            return Ok(false);
        }
        warn!(
            "Found leftover backup {}; restoring it before starting",
            self.backup_path.display()
        );
        if self.data_path.exists() {
            self.preserve_unsynced()
                .map_err(|e| SessionError::setup("preserve data from interrupted session", e))?;
        }
        fsutil::move_dir(&self.backup_path, &self.data_path)
            .map_err(|e| SessionError::setup("restore leftover backup", e))?;
        Ok(true)
    }

    /// Back up the real data and populate the data path from `source`.
    ///
    /// Any failure puts the original data back before returning.
    pub async fn prepare(
        &mut self,
        source: &Endpoint,
        synchronizer: &Synchronizer,
    ) -> Result<(), SessionError> {
        self.recover()?;

        if self.data_path.exists() {
            fsutil::move_dir(&self.data_path, &self.backup_path)
                .map_err(|e| SessionError::setup("back up real data", e))?;
            self.backed_up = true;
            info!(
                "Backed up {} to {}",
                self.data_path.display(),
                self.backup_path.display()
            );
        } else {
            info!("Nothing to back up at {}", self.data_path.display());
        }

        let populated = match std::fs::create_dir_all(&self.data_path) {
            Ok(()) => synchronizer
                .synchronize(source, &self.working_endpoint())
                .await
                .map_err(|e| SessionError::setup("populate real data location", e)),
            Err(e) => Err(SessionError::setup("create real data location", e)),
        };

        if let Err(e) = populated {
            self.revert();
            return Err(e);
        }
        Ok(())
    }

    fn revert(&mut self) {
        if !self.backed_up {
            if let Err(e) = fsutil::remove_dir_if_exists(&self.data_path) {
                warn!("Failed to remove partial data {}: {}", self.data_path.display(), e);
            }
            return;
        }
        let restored = fsutil::remove_dir_if_exists(&self.data_path)
            .and_then(|()| fsutil::move_dir(&self.backup_path, &self.data_path));
        match restored {
            Ok(()) => {
                self.backed_up = false;
                info!("Reverted {} to its original contents", self.data_path.display());
            }
            Err(e) => warn!(
                "Failed to revert {}: {} (backup kept at {})",
                self.data_path.display(),
                e,
                self.backup_path.display()
            ),
        }
    }

    /// Put the original data back.
    ///
    /// When the session's data did not reach its source (`drained` is
    /// false), it is kept beside the real path instead of being deleted.
    pub fn teardown(mut self, drained: bool) -> Result<(), SessionError> {
        if !self.backed_up {
            return Ok(());
        }
        let teardown_err = |context: &str, source| SessionError::Teardown {
            context: context.to_string(),
            source,
        };

        if drained {
            fsutil::remove_dir_if_exists(&self.data_path)
                .map_err(|e| teardown_err("remove session data", e))?;
        } else if self.data_path.exists() {
            let kept = self
                .preserve_unsynced()
                .map_err(|e| teardown_err("preserve unsynced session data", e))?;
            warn!("Session data was not synced; kept at {}", kept.display());
        }

        fsutil::move_dir(&self.backup_path, &self.data_path)
            .map_err(|e| teardown_err("restore backup", e))?;
        self.backed_up = false;
        info!("Restored original data at {}", self.data_path.display());
        Ok(())
    }

    fn preserve_unsynced(&self) -> std::io::Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let target = sibling(&self.data_path, &format!("{UNSYNCED_SUFFIX}{stamp}"))
            .ok_or_else(|| std::io::Error::other("data path has no final component"))?;
        fsutil::move_dir(&self.data_path, &target)?;
        Ok(target)
    }
}

fn sibling(path: &Path, suffix: &str) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(suffix);
    Some(path.with_file_name(name))
}
