//! Endpoint model shared by every savesync component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where an endpoint's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// A directory on a locally mounted filesystem.
    Local,
    /// A path on an rclone remote.
    Remote,
}

/// Tri-state sync-on-exit flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOnExit {
    /// Use the registry-wide default.
    #[default]
    Inherit,
    Enabled,
    Disabled,
}

impl SyncOnExit {
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Self::Inherit => default,
            Self::Enabled => true,
            Self::Disabled => false,
        }
    }
}

impl From<bool> for SyncOnExit {
    fn from(value: bool) -> Self {
        if value { Self::Enabled } else { Self::Disabled }
    }
}

/// A configured save storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub kind: EndpointKind,
    /// Directory path; for remotes, the path inside the remote.
    pub path: PathBuf,
    /// rclone remote name (remote endpoints only).
    pub remote_name: Option<String>,
    /// Periodic sync interval. `None` means event-driven (watch) mode.
    pub interval: Option<Duration>,
    pub sync_on_exit: SyncOnExit,
    /// Display label, usually the spec the endpoint was parsed from.
    pub label: String,
}

impl Endpoint {
    /// A local endpoint in watch mode.
    pub fn local(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Local,
            path: path.into(),
            remote_name: None,
            interval: None,
            sync_on_exit: SyncOnExit::Inherit,
            label: label.into(),
        }
    }

    /// A remote endpoint in watch mode.
    pub fn remote(
        remote_name: impl Into<String>,
        path: impl Into<PathBuf>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            kind: EndpointKind::Remote,
            path: path.into(),
            remote_name: Some(remote_name.into()),
            interval: None,
            sync_on_exit: SyncOnExit::Inherit,
            label: label.into(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    pub fn with_sync_on_exit(mut self, flag: SyncOnExit) -> Self {
        self.sync_on_exit = flag;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.kind == EndpointKind::Remote
    }

    pub fn is_periodic(&self) -> bool {
        self.interval.is_some()
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self.kind {
            EndpointKind::Local => Some(&self.path),
            EndpointKind::Remote => None,
        }
    }

    /// Argument form understood by the copy tool: a bare path or `remote:path`.
    pub fn transfer_spec(&self) -> String {
        match (&self.kind, &self.remote_name) {
            (EndpointKind::Remote, Some(remote)) => {
                format!("{}:{}", remote, self.path.display())
            }
            _ => self.path.display().to_string(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Ordered, immutable list of endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    sync_on_exit_default: bool,
}

impl EndpointRegistry {
    /// Build a registry, applying the primary-endpoint default.
    ///
    /// The first endpoint syncs on exit unless it says otherwise; the rest
    /// inherit `sync_on_exit_default`.
    pub fn new(mut endpoints: Vec<Endpoint>, sync_on_exit_default: bool) -> Self {
        if let Some(primary) = endpoints.first_mut()
            && primary.sync_on_exit == SyncOnExit::Inherit
        {
            primary.sync_on_exit = SyncOnExit::Enabled;
        }
        Self {
            endpoints,
            sync_on_exit_default,
        }
    }

    /// Parse every spec, failing on the first malformed one.
    pub fn from_specs<S: AsRef<str>>(
        specs: &[S],
        sync_on_exit_default: bool,
    ) -> Result<Self, crate::SessionError> {
        let endpoints = specs
            .iter()
            .map(|spec| crate::config::parse_endpoint_spec(spec.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints, sync_on_exit_default))
    }

    pub fn all(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn primary(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }

    pub fn all_remote(&self) -> bool {
        !self.endpoints.is_empty() && self.endpoints.iter().all(Endpoint::is_remote)
    }

    pub fn periodic(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| e.is_periodic())
    }

    pub fn watched(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| !e.is_periodic())
    }

    /// Whether `endpoint` receives the working data on exit.
    pub fn syncs_on_exit(&self, endpoint: &Endpoint) -> bool {
        endpoint.sync_on_exit.resolve(self.sync_on_exit_default)
    }

    /// Endpoints written back after the managed process exits.
    ///
    /// The resolved source always comes first; every other endpoint with an
    /// effective sync-on-exit flag follows in registry order.
    pub fn drain_targets<'a>(&'a self, source: Option<&'a Endpoint>) -> Vec<&'a Endpoint> {
        let mut targets: Vec<&Endpoint> = Vec::new();
        if let Some(source) = source {
            targets.push(source);
        }
        for endpoint in &self.endpoints {
            if self.syncs_on_exit(endpoint) && !targets.contains(&endpoint) {
                targets.push(endpoint);
            }
        }
        targets
    }
}
