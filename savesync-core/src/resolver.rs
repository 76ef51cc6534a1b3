//! Freshness resolution across endpoints.

use crate::errors::{SessionError, SyncFailure};
use crate::fsutil;
use crate::transfer::{RemoteTransfer, latest_entry_time};
use crate::types::Endpoint;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Picks the endpoint holding the most recently modified save data.
#[derive(Clone)]
pub struct FreshnessResolver {
    transfer: Arc<dyn RemoteTransfer>,
}

impl FreshnessResolver {
    pub fn new(transfer: Arc<dyn RemoteTransfer>) -> Self {
        Self { transfer }
    }

    /// Latest modification time across everything stored at `endpoint`.
    pub async fn latest_modification(
        &self,
        endpoint: &Endpoint,
    ) -> Result<SystemTime, SyncFailure> {
        match endpoint.local_path() {
            Some(path) => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || fsutil::latest_modification(&path))
                    .await
                    .map_err(|e| SyncFailure::Join(e.to_string()))?
                    .map_err(SyncFailure::from)
            }
            None => {
                let entries = self.transfer.list(&endpoint.transfer_spec()).await?;
                Ok(latest_entry_time(&entries))
            }
        }
    }

    /// Select the freshest reachable endpoint.
    ///
    /// Unreachable endpoints are skipped with a warning. On equal timestamps
    /// the earlier endpoint in `endpoints` wins.
    pub async fn resolve<'a>(
        &self,
        endpoints: &'a [Endpoint],
    ) -> Result<&'a Endpoint, SessionError> {
        let mut observed = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            match self.latest_modification(endpoint).await {
                Ok(modified) => {
                    debug!(
                        "{} last modified {}",
                        endpoint,
                        chrono::DateTime::<chrono::Utc>::from(modified).to_rfc3339()
                    );
                    observed.push((endpoint, modified));
                }
                Err(e) => warn!("Skipping unreachable endpoint {}: {}", endpoint, e),
            }
        }

        let source = pick_freshest(observed).ok_or(SessionError::NoReachableSource {
            checked: endpoints.len(),
        })?;
        info!("Using {} as the save source", source);
        Ok(source)
    }
}

/// First item with the strictly greatest timestamp.
fn pick_freshest<T>(observed: impl IntoIterator<Item = (T, SystemTime)>) -> Option<T> {
    let mut best: Option<(T, SystemTime)> = None;
    for (item, modified) in observed {
        match &best {
            Some((_, current)) if modified <= *current => {}
            _ => best = Some((item, modified)),
        }
    }
    best.map(|(item, _)| item)
}
