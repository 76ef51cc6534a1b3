//! Subcommand implementations.

use crate::settings::Settings;
use anyhow::{Context, Result};
use savesync_core::{
    EndpointRegistry, NoRemoteTransfer, ProcessOutcome, Rclone, RemoteTransfer, SessionReport,
    SystemLiveness, launch_session, spawn_signal_listener,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exit code used when the session was interrupted by a signal.
const INTERRUPTED_EXIT: u8 = 130;

pub async fn launch(settings: &Settings, cancel: CancellationToken) -> Result<ExitCode> {
    let config = settings.session_config()?;

    let transfer: Arc<dyn RemoteTransfer> = if config.registry.all().iter().any(|e| e.is_remote())
    {
        let rclone = prepare_rclone(settings, &config.registry).await?;
        Arc::new(rclone)
    } else {
        debug!("No remote targets; rclone not required");
        Arc::new(NoRemoteTransfer)
    };

    let listener = spawn_signal_listener(cancel.clone());
    let result = launch_session(config, transfer, &SystemLiveness, cancel.clone()).await;
    // Stop the listener if the session ended on its own.
    cancel.cancel();
    let _ = listener.await;

    let report = result?;
    summarize(&report);
    Ok(ExitCode::from(exit_status(&report.outcome)))
}

/// Locate rclone, run the wizard if it has never been configured and warn
/// about targets naming unknown remotes.
async fn prepare_rclone(settings: &Settings, registry: &EndpointRegistry) -> Result<Rclone> {
    let rclone = Rclone::new(settings.rclone_options())
        .context("Remote targets are configured but rclone could not be found")?;
    debug!("Using rclone at {}", rclone.binary().display());

    if !settings.rclone_config.exists() {
        info!(
            "No rclone config at {}; starting the configuration wizard",
            settings.rclone_config.display()
        );
        rclone
            .run_config_wizard()
            .await
            .context("rclone configuration failed")?;
    }

    match rclone.list_remotes().await {
        Ok(known) => {
            for endpoint in registry.all() {
                if let Some(name) = &endpoint.remote_name
                    && !known.iter().any(|k| k == name)
                {
                    warn!(
                        "Remote '{}' used by target '{}' is not configured in {}",
                        name,
                        endpoint.label,
                        settings.rclone_config.display()
                    );
                }
            }
        }
        Err(e) => warn!("Could not list rclone remotes: {}", e),
    }
    Ok(rclone)
}

fn summarize(report: &SessionReport) {
    if let Some(source) = &report.source {
        debug!("Session used data from '{}'", source);
    }
    for failure in &report.sync_failures {
        warn!("{}", failure);
    }
    for failure in &report.teardown_failures {
        warn!("{}", failure);
    }
    if report.sync_failures.is_empty() && report.teardown_failures.is_empty() {
        info!("Session finished ({:?})", report.strategy);
    } else {
        warn!(
            "Session finished with {} sync and {} teardown failure(s)",
            report.sync_failures.len(),
            report.teardown_failures.len()
        );
    }
}

fn exit_status(outcome: &ProcessOutcome) -> u8 {
    match outcome {
        ProcessOutcome::Exited(Some(0)) => 0,
        ProcessOutcome::Exited(_) => 1,
        ProcessOutcome::Interrupted => INTERRUPTED_EXIT,
    }
}

/// Remove the installation and a bundled rclone; the rclone config stays.
pub fn clean(settings: &Settings) -> Result<()> {
    match &settings.install_path {
        Some(path) if path.exists() => {
            std::fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            info!("Removed {}", path.display());
        }
        Some(path) => debug!("{} does not exist", path.display()),
        None => warn!("No install path configured; nothing to remove"),
    }

    if let Some(rclone) = &settings.bundled_rclone
        && rclone.is_file()
    {
        std::fs::remove_file(rclone)
            .with_context(|| format!("Failed to remove {}", rclone.display()))?;
        info!("Removed {}", rclone.display());
    }

    if settings.rclone_config.exists() {
        warn!(
            "Keeping rclone config {}; delete it by hand to forget your remotes",
            settings.rclone_config.display()
        );
    }
    Ok(())
}

pub async fn auth(settings: &Settings) -> Result<()> {
    let rclone = Rclone::new(settings.rclone_options()).context("rclone could not be found")?;
    rclone
        .run_config_wizard()
        .await
        .context("rclone configuration failed")?;
    info!("rclone config saved to {}", settings.rclone_config.display());
    Ok(())
}
