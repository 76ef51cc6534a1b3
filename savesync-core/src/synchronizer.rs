//! Directory synchronization between endpoints.
//!
//! Local-to-local syncs mirror the source exactly. Anything touching a
//! remote goes through the copy tool and is copy-only: files missing from
//! the source are never deleted at the destination.

use crate::errors::{SyncError, SyncFailure};
use crate::fsutil;
use crate::transfer::RemoteTransfer;
use crate::types::Endpoint;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Synchronizer {
    transfer: Arc<dyn RemoteTransfer>,
}

impl Synchronizer {
    pub fn new(transfer: Arc<dyn RemoteTransfer>) -> Self {
        Self { transfer }
    }

    pub fn transfer(&self) -> &Arc<dyn RemoteTransfer> {
        &self.transfer
    }

    /// Make `destination` reflect `source`.
    pub async fn synchronize(
        &self,
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<(), SyncError> {
        let started = Instant::now();
        match (source.local_path(), destination.local_path()) {
            (Some(src), Some(dest)) => {
                if same_dir(src, dest) {
                    debug!("Skipping sync of {} onto itself", source);
                    return Ok(());
                }
                let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
                tokio::task::spawn_blocking(move || fsutil::mirror_dir(&src, &dest))
                    .await
                    .map_err(|e| {
                        SyncError::new(
                            &source.label,
                            &destination.label,
                            SyncFailure::Join(e.to_string()),
                        )
                    })?
                    .map_err(|e| SyncError::new(&source.label, &destination.label, e))?;
            }
            _ => {
                self.transfer
                    .copy(&source.transfer_spec(), &destination.transfer_spec())
                    .await
                    .map_err(|e| SyncError::new(&source.label, &destination.label, e))?;
            }
        }
        info!(
            "Synced {} -> {} in {}ms",
            source,
            destination,
            started.elapsed().as_millis()
        );
        Ok(())
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    let canonical =
        |p: &Path| -> PathBuf { p.canonicalize().unwrap_or_else(|_| p.to_path_buf()) };
    canonical(a) == canonical(b)
}
