//! Launch sessions.
//!
//! One session is one run of the managed executable:
//!
//! ```text
//! Idle -> AcquiringLock -> PreparingEnvironment -> Running -> Draining -> TornDown
//! ```
//!
//! The strategy is chosen from the endpoint composition. Teardown and lock
//! release run on every path out of `PreparingEnvironment` or later,
//! including interruption.

use crate::errors::{SessionError, SyncError};
use crate::lock::{InstanceLock, ProcessLiveness};
use crate::resolver::FreshnessResolver;
use crate::sandbox::{EnvOverrides, Sandbox, SandboxManager};
use crate::scheduler::BackgroundScheduler;
use crate::supervisor::{LaunchSpec, ManagedProcess, ProcessOutcome};
use crate::swap::SwapController;
use crate::synchronizer::Synchronizer;
use crate::transfer::RemoteTransfer;
use crate::types::{Endpoint, EndpointRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── State machine ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringLock,
    PreparingEnvironment,
    Running,
    Draining,
    TornDown,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, AcquiringLock)
                | (Idle, PreparingEnvironment)
                | (AcquiringLock, PreparingEnvironment)
                | (AcquiringLock, TornDown)
                | (PreparingEnvironment, Running)
                | (PreparingEnvironment, TornDown)
                | (Running, Draining)
                | (Draining, TornDown)
        )
    }
}

struct StateMachine {
    history: Vec<SessionState>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            history: vec![SessionState::Idle],
        }
    }

    fn current(&self) -> SessionState {
        self.history
            .last()
            .copied()
            .unwrap_or(SessionState::Idle)
    }

    fn advance(&mut self, next: SessionState) {
        let current = self.current();
        if current.can_transition_to(next) {
            debug!("Session state {:?} -> {:?}", current, next);
        } else {
            error!("Unexpected session transition {:?} -> {:?}", current, next);
        }
        self.history.push(next);
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// No endpoints: just run the executable.
    Direct,
    /// Only remotes: copy into the real data location before, back after.
    PrePostSync,
    /// Run against a throwaway home directory.
    Sandboxed,
    /// Swap the real data location out and back under the lock.
    Swap,
}

impl Strategy {
    pub fn select(registry: &EndpointRegistry, isolate: bool) -> Self {
        if registry.is_empty() {
            Self::Direct
        } else if registry.all_remote() {
            Self::PrePostSync
        } else if isolate {
            Self::Sandboxed
        } else {
            Self::Swap
        }
    }
}

// ── Configuration and report ─────────────────────────────────────────────

/// Everything needed to run one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Working directory for the process.
    pub install_path: Option<PathBuf>,
    /// The user's real save location. Required unless the registry is empty.
    pub data_path: Option<PathBuf>,
    /// Home directory the data path lives under; defaults to the user's.
    pub home_dir: Option<PathBuf>,
    pub registry: EndpointRegistry,
    pub isolate: bool,
    pub lock_path: PathBuf,
    pub debounce: Duration,
    pub sandbox_parent: PathBuf,
}

impl SessionConfig {
    pub fn new(executable: impl Into<PathBuf>, registry: EndpointRegistry) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            install_path: None,
            data_path: None,
            home_dir: None,
            registry,
            isolate: true,
            lock_path: crate::config::default_lock_path()
                .unwrap_or_else(|| std::env::temp_dir().join("savesync").join("session.lock")),
            debounce: crate::config::DEFAULT_DEBOUNCE,
            sandbox_parent: std::env::temp_dir(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::select(&self.registry, self.isolate)
    }

    fn require_data_path(&self) -> Result<&Path, SessionError> {
        self.data_path.as_deref().ok_or_else(|| {
            SessionError::config("data_path", "required when endpoints are configured")
        })
    }
}

/// What happened during a session that got past preparation.
#[derive(Debug)]
pub struct SessionReport {
    pub strategy: Strategy,
    pub outcome: ProcessOutcome,
    /// Label of the endpoint the working data came from.
    pub source: Option<String>,
    pub sync_failures: Vec<SyncError>,
    pub teardown_failures: Vec<SessionError>,
    pub states: Vec<SessionState>,
}

impl SessionReport {
    /// The managed process exited cleanly. Background and teardown
    /// failures do not count against this.
    pub fn success(&self) -> bool {
        self.outcome.success()
    }
}

// ── Workspace ────────────────────────────────────────────────────────────

/// Where the managed process reads and writes its data.
enum Workspace {
    Direct,
    InPlace(PathBuf),
    Sandbox(Sandbox),
    Swap(SwapController),
}

impl Workspace {
    fn working_endpoint(&self) -> Option<Endpoint> {
        match self {
            Self::Direct => None,
            Self::InPlace(path) => Some(Endpoint::local(path, "session")),
            Self::Sandbox(sandbox) => Some(sandbox.working_endpoint()),
            Self::Swap(swap) => Some(swap.working_endpoint()),
        }
    }

    fn env(&self) -> EnvOverrides {
        match self {
            Self::Sandbox(sandbox) => sandbox.env_overrides(),
            _ => EnvOverrides::new(),
        }
    }

    fn teardown(self, drained: bool) -> Result<(), SessionError> {
        match self {
            Self::Direct | Self::InPlace(_) => Ok(()),
            Self::Sandbox(sandbox) => sandbox.teardown(drained),
            Self::Swap(swap) => swap.teardown(drained),
        }
    }
}

async fn prepare(
    config: &SessionConfig,
    strategy: Strategy,
    source: &Endpoint,
    synchronizer: &Synchronizer,
) -> Result<Workspace, SessionError> {
    match strategy {
        Strategy::Direct => Ok(Workspace::Direct),
        Strategy::PrePostSync => {
            let data_path = config.require_data_path()?;
            std::fs::create_dir_all(data_path)
                .map_err(|e| SessionError::setup("create data location", e))?;
            synchronizer
                .synchronize(source, &Endpoint::local(data_path, "session"))
                .await
                .map_err(|e| SessionError::setup("pre-launch sync", e))?;
            Ok(Workspace::InPlace(data_path.to_path_buf()))
        }
        Strategy::Sandboxed => {
            let data_path = config.require_data_path()?;
            let home = match &config.home_dir {
                Some(home) => home.clone(),
                None => dirs::home_dir().ok_or_else(|| {
                    SessionError::config("home_dir", "cannot determine home directory")
                })?,
            };
            let manager = SandboxManager::new(&config.sandbox_parent, &home, data_path)?;
            Ok(Workspace::Sandbox(manager.prepare(source, synchronizer).await?))
        }
        Strategy::Swap => {
            let mut swap = SwapController::new(config.require_data_path()?)?;
            swap.prepare(source, synchronizer).await?;
            Ok(Workspace::Swap(swap))
        }
    }
}

fn launch_spec(config: &SessionConfig, workspace: &Workspace) -> LaunchSpec {
    let working_dir = config
        .install_path
        .clone()
        .or_else(|| workspace.working_endpoint().map(|ep| ep.path))
        .or_else(|| config.executable.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    LaunchSpec::new(&config.executable, working_dir)
        .with_args(config.args.iter().cloned())
        .with_env(workspace.env())
}

// ── Session ──────────────────────────────────────────────────────────────

/// Run one session to completion.
///
/// Errors before the managed process starts are returned. Once it has
/// started, the session always drains and tears down, and later failures
/// are collected into the report.
pub async fn launch_session(
    config: SessionConfig,
    transfer: Arc<dyn RemoteTransfer>,
    liveness: &dyn ProcessLiveness,
    cancel: CancellationToken,
) -> Result<SessionReport, SessionError> {
    let strategy = config.strategy();
    let synchronizer = Synchronizer::new(Arc::clone(&transfer));
    let resolver = FreshnessResolver::new(transfer);
    let mut machine = StateMachine::new();
    info!("Starting session ({:?})", strategy);

    let lock = if strategy == Strategy::Direct {
        None
    } else {
        config.require_data_path()?;
        machine.advance(SessionState::AcquiringLock);
        match InstanceLock::acquire(&config.lock_path, liveness) {
            Ok(lock) => Some(lock),
            Err(e) => {
                machine.advance(SessionState::TornDown);
                return Err(e);
            }
        }
    };

    machine.advance(SessionState::PreparingEnvironment);
    let result = run_prepared(
        &config,
        strategy,
        &resolver,
        &synchronizer,
        &cancel,
        &mut machine,
    )
    .await;
    machine.advance(SessionState::TornDown);

    if let Some(lock) = lock {
        lock.release();
    }

    result.map(|mut report| {
        report.states = machine.history;
        report
    })
}

async fn run_prepared(
    config: &SessionConfig,
    strategy: Strategy,
    resolver: &FreshnessResolver,
    synchronizer: &Synchronizer,
    cancel: &CancellationToken,
    machine: &mut StateMachine,
) -> Result<SessionReport, SessionError> {
    let source = if strategy == Strategy::Direct {
        None
    } else {
        Some(resolver.resolve(config.registry.all()).await?.clone())
    };
    let workspace = match &source {
        Some(source) => prepare(config, strategy, source, synchronizer).await?,
        None => Workspace::Direct,
    };

    let mut report = SessionReport {
        strategy,
        outcome: ProcessOutcome::Interrupted,
        source: source.as_ref().map(|ep| ep.label.clone()),
        sync_failures: Vec::new(),
        teardown_failures: Vec::new(),
        states: Vec::new(),
    };

    if cancel.is_cancelled() {
        warn!("Interrupted before launch");
        record_teardown(workspace.teardown(true), &mut report);
        return Ok(report);
    }

    let process = match ManagedProcess::launch(&launch_spec(config, &workspace)) {
        Ok(process) => process,
        Err(e) => {
            record_teardown(workspace.teardown(true), &mut report);
            return Err(e);
        }
    };
    machine.advance(SessionState::Running);

    let working = workspace.working_endpoint();
    let scheduler = working.as_ref().map(|working| {
        BackgroundScheduler::start(
            working.clone(),
            &config.registry,
            synchronizer.clone(),
            config.debounce,
            cancel.child_token(),
        )
    });

    let waited = process.wait_or_cancel(cancel).await;
    machine.advance(SessionState::Draining);
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    let mut drained = true;
    if let (Some(working), Some(source)) = (&working, &source) {
        for target in config.registry.drain_targets(Some(source)) {
            if let Err(e) = synchronizer.synchronize(working, target).await {
                warn!("{}", e);
                if target == source {
                    drained = false;
                }
                report.sync_failures.push(e);
            }
        }
    }

    record_teardown(workspace.teardown(drained), &mut report);
    report.outcome = waited?;
    Ok(report)
}

fn record_teardown(result: Result<(), SessionError>, report: &mut SessionReport) {
    if let Err(e) = result {
        warn!("{}", e);
        report.teardown_failures.push(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Liveness;
    use crate::mock::MockTransfer;
    use crate::types::SyncOnExit;

    struct AlwaysDead;

    impl ProcessLiveness for AlwaysDead {
        fn probe(&self, _pid: u32) -> Liveness {
            Liveness::Dead
        }
    }

    #[test]
    fn test_strategy_follows_endpoint_composition() {
        let empty = EndpointRegistry::default();
        assert_eq!(Strategy::select(&empty, true), Strategy::Direct);

        let remote = EndpointRegistry::new(vec![Endpoint::remote("r", "/s", "r:/s")], false);
        assert_eq!(Strategy::select(&remote, true), Strategy::PrePostSync);
        assert_eq!(Strategy::select(&remote, false), Strategy::PrePostSync);

        let mixed = EndpointRegistry::new(
            vec![Endpoint::remote("r", "/s", "r:/s"), Endpoint::local("/a", "a")],
            false,
        );
        assert_eq!(Strategy::select(&mixed, true), Strategy::Sandboxed);
        assert_eq!(Strategy::select(&mixed, false), Strategy::Swap);
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(AcquiringLock));
        assert!(AcquiringLock.can_transition_to(TornDown));
        assert!(PreparingEnvironment.can_transition_to(TornDown));
        assert!(Running.can_transition_to(Draining));
        assert!(!Running.can_transition_to(TornDown));
        assert!(!Idle.can_transition_to(Running));
        assert!(!TornDown.can_transition_to(Idle));
    }

    #[tokio::test]
    async fn test_missing_data_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EndpointRegistry::new(vec![Endpoint::local(dir.path(), "a")], false);
        let mut config = SessionConfig::new("/bin/true", registry);
        config.lock_path = dir.path().join("session.lock");

        let err = launch_session(
            config,
            Arc::new(MockTransfer::new()),
            &AlwaysDead,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Config { .. }));
        assert!(!dir.path().join("session.lock").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sandboxed_session_writes_back_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let primary = root.path().join("primary");
        let mirror = root.path().join("mirror");
        let sandboxes = root.path().join("sandboxes");
        std::fs::create_dir_all(&primary).unwrap();
        std::fs::create_dir_all(&mirror).unwrap();
        std::fs::create_dir_all(&sandboxes).unwrap();
        std::fs::write(primary.join("user1.dat"), "before").unwrap();

        let registry = EndpointRegistry::new(
            vec![
                Endpoint::local(&primary, "primary"),
                Endpoint::local(&mirror, "mirror").with_sync_on_exit(SyncOnExit::Enabled),
            ],
            false,
        );
        let mut config = SessionConfig::new("/bin/sh", registry);
        config.args = vec!["-c".into(), r#"echo after > "$HOME/game/user1.dat""#.into()];
        config.home_dir = Some(PathBuf::from("/home/player"));
        config.data_path = Some(PathBuf::from("/home/player/game"));
        config.lock_path = root.path().join("session.lock");
        config.sandbox_parent = sandboxes.clone();

        let report = launch_session(
            config,
            Arc::new(MockTransfer::new()),
            &AlwaysDead,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.success());
        assert_eq!(report.strategy, Strategy::Sandboxed);
        assert_eq!(report.source.as_deref(), Some("primary"));
        assert!(report.sync_failures.is_empty());
        assert_eq!(
            std::fs::read_to_string(primary.join("user1.dat")).unwrap(),
            "after\n"
        );
        assert_eq!(
            std::fs::read_to_string(mirror.join("user1.dat")).unwrap(),
            "after\n"
        );
        assert_eq!(std::fs::read_dir(&sandboxes).unwrap().count(), 0);
        assert!(!root.path().join("session.lock").exists());
        assert_eq!(
            report.states,
            vec![
                SessionState::Idle,
                SessionState::AcquiringLock,
                SessionState::PreparingEnvironment,
                SessionState::Running,
                SessionState::Draining,
                SessionState::TornDown,
            ]
        );
    }
}
