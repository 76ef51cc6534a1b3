//! Managed process supervision.

use crate::errors::SessionError;
use crate::sandbox::EnvOverrides;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to run and how.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: EnvOverrides,
}

impl LaunchSpec {
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: EnvOverrides::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }
}

/// How the managed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited on its own. `None` when killed by a signal we did not send.
    Exited(Option<i32>),
    /// Terminated because the session was cancelled.
    Interrupted,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }
}

/// A running managed process.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    executable: PathBuf,
}

impl ManagedProcess {
    /// Start the process without waiting for it.
    pub fn launch(spec: &LaunchSpec) -> Result<Self, SessionError> {
        let launch_err = |source| SessionError::Launch {
            executable: spec.executable.clone(),
            source,
        };
        if !spec.executable.is_file() {
            return Err(launch_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "executable not found",
            )));
        }

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        spec.env.apply(&mut cmd);

        let child = cmd.spawn().map_err(launch_err)?;
        info!(
            "Launched {} (pid {})",
            spec.executable.display(),
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );
        Ok(Self {
            child,
            executable: spec.executable.clone(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Wait for exit; kill the process if `cancel` fires first.
    pub async fn wait_or_cancel(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, SessionError> {
        tokio::select! {
            status = self.child.wait() => {
                let status = status.map_err(|source| SessionError::Launch {
                    executable: self.executable.clone(),
                    source,
                })?;
                info!("{} exited with {}", self.executable.display(), status);
                Ok(ProcessOutcome::Exited(status.code()))
            }
            _ = cancel.cancelled() => {
                warn!("Interrupted; terminating {}", self.executable.display());
                self.terminate().await;
                Ok(ProcessOutcome::Interrupted)
            }
        }
    }

    /// Kill the process and reap it.
    pub async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {}: {}", self.executable.display(), e);
        }
    }
}

/// Cancel `token` on Ctrl-C, or SIGTERM on unix.
///
/// The listener exits quietly if the token is cancelled by someone else.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl-C"),
            _ = terminate => info!("Received SIGTERM"),
            _ = token.cancelled() => {
                debug!("Signal listener stopped");
                return;
            }
        }
        token.cancel();
    })
}
