//! Savesync core engine.
//!
//! Picks the freshest copy of a game's save data among several endpoints,
//! seeds a working location from it, keeps the endpoints updated while the
//! game runs and restores the user's real data on every exit path.

pub mod config;
pub mod errors;
pub mod fsutil;
pub mod lock;
pub mod logging;
pub mod mock;
pub mod resolver;
pub mod sandbox;
pub mod scheduler;
pub mod session;
pub mod supervisor;
pub mod swap;
pub mod synchronizer;
pub mod transfer;
pub mod types;

pub use config::{EnvError, EnvParser, FileConfig, parse_endpoint_spec};
pub use errors::{SessionError, SyncError, SyncFailure, TransferError};
pub use lock::{InstanceLock, Liveness, ProcessLiveness, SystemLiveness};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use resolver::FreshnessResolver;
pub use sandbox::{EnvOverrides, SandboxManager};
pub use scheduler::{BackgroundScheduler, Debouncer, SchedulerHandle};
pub use session::{SessionConfig, SessionReport, SessionState, Strategy, launch_session};
pub use supervisor::{LaunchSpec, ManagedProcess, ProcessOutcome, spawn_signal_listener};
pub use swap::SwapController;
pub use synchronizer::Synchronizer;
pub use transfer::{NoRemoteTransfer, Rclone, RcloneOptions, RemoteEntry, RemoteTransfer};
pub use types::{Endpoint, EndpointKind, EndpointRegistry, SyncOnExit};
