//! Isolated session sandbox.
//!
//! The sandbox is a throwaway home directory. The managed process sees it
//! through redirected user-data variables; the real home is never written.
//!
//! Layout under `<parent>/savesync-session-<uuid>/home/`:
//!
//! ```text
//! .config/  .local/share/  .local/state/  .cache/
//! AppData/Roaming/  AppData/Local/  AppData/LocalLow/  Documents/
//! <data path relative to the real home>   (populated from the source)
//! ```

use crate::errors::SessionError;
use crate::fsutil;
use crate::synchronizer::Synchronizer;
use crate::types::Endpoint;
use chrono::Utc;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name prefix for data kept from a sandbox that could not be drained.
pub const UNSYNCED_PREFIX: &str = "savesync-unsynced-";

/// Directories every sandbox home gets, relative to the home root.
const HOME_SKELETON: &[&str] = &[
    ".config",
    ".local/share",
    ".local/state",
    ".cache",
    "AppData/Roaming",
    "AppData/Local",
    "AppData/LocalLow",
    "Documents",
];

/// Environment variables to set on the managed process.
///
/// Everything not listed is inherited unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    vars: BTreeMap<String, OsString>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<OsString>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&OsStr> {
        self.vars.get(name).map(OsString::as_os_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str()))
    }

    /// Apply the overrides to a command about to be spawned.
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        for (name, value) in self.iter() {
            cmd.env(name, value);
        }
    }
}

/// Creates sandboxes for one data path.
#[derive(Debug, Clone)]
pub struct SandboxManager {
    parent: PathBuf,
    relative_data: PathBuf,
}

impl SandboxManager {
    /// `data_path` must lie strictly below `home_dir`.
    pub fn new(
        parent: impl Into<PathBuf>,
        home_dir: &Path,
        data_path: &Path,
    ) -> Result<Self, SessionError> {
        let relative_data = relative_to_home(home_dir, data_path).ok_or_else(|| {
            SessionError::setup(
                format!(
                    "data path {} is not inside home {}",
                    data_path.display(),
                    home_dir.display()
                ),
                "cannot map data path into the sandbox",
            )
        })?;
        Ok(Self {
            parent: parent.into(),
            relative_data,
        })
    }

    /// Build a fresh sandbox and populate its data directory from `source`.
    ///
    /// On failure the partially built sandbox is removed before returning.
    pub async fn prepare(
        &self,
        source: &Endpoint,
        synchronizer: &Synchronizer,
    ) -> Result<Sandbox, SessionError> {
        let root = self
            .parent
            .join(format!("savesync-session-{}", Uuid::new_v4()));
        let sandbox = Sandbox {
            home: root.join("home"),
            data_dir: root.join("home").join(&self.relative_data),
            root,
        };

        if let Err(e) = sandbox.build_skeleton() {
            sandbox.discard();
            return Err(SessionError::setup(
                format!("create sandbox {}", sandbox.root.display()),
                e,
            ));
        }

        if let Err(e) = synchronizer
            .synchronize(source, &sandbox.working_endpoint())
            .await
        {
            sandbox.discard();
            return Err(SessionError::setup("populate sandbox", e));
        }

        info!(
            "Sandbox ready at {} (data: {})",
            sandbox.root.display(),
            sandbox.data_dir.display()
        );
        Ok(sandbox)
    }
}

fn relative_to_home(home: &Path, data: &Path) -> Option<PathBuf> {
    let strip = |home: &Path, data: &Path| {
        data.strip_prefix(home)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
    };
    strip(home, data).or_else(|| {
        let home = home.canonicalize().ok()?;
        let data = data.canonicalize().ok()?;
        strip(&home, &data)
    })
}

/// A prepared sandbox. Call [`Sandbox::teardown`] when the session ends.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    home: PathBuf,
    data_dir: PathBuf,
}

impl Sandbox {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The sandboxed counterpart of the real data path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn working_endpoint(&self) -> Endpoint {
        Endpoint::local(&self.data_dir, "session")
    }

    /// Variables redirecting user-data lookups into the sandbox home.
    pub fn env_overrides(&self) -> EnvOverrides {
        let home = &self.home;
        let mut env = EnvOverrides::new();
        env.set("HOME", home);
        env.set("USERPROFILE", home);
        env.set("XDG_CONFIG_HOME", home.join(".config"));
        env.set("XDG_DATA_HOME", home.join(".local/share"));
        env.set("XDG_STATE_HOME", home.join(".local/state"));
        env.set("XDG_CACHE_HOME", home.join(".cache"));
        env.set("APPDATA", home.join("AppData/Roaming"));
        env.set("LOCALAPPDATA", home.join("AppData/Local"));
        env
    }

    fn build_skeleton(&self) -> std::io::Result<()> {
        for dir in HOME_SKELETON {
            std::fs::create_dir_all(self.home.join(dir))?;
        }
        std::fs::create_dir_all(&self.data_dir)?;
        debug!("Created sandbox skeleton under {}", self.home.display());
        Ok(())
    }

    fn discard(&self) {
        if let Err(e) = fsutil::remove_dir_if_exists(&self.root) {
            warn!("Failed to remove sandbox {}: {}", self.root.display(), e);
        }
    }

    /// Delete the sandbox tree.
    ///
    /// When the session's data did not reach its source (`drained` is
    /// false), the data directory is first moved out beside the sandbox so
    /// the progress survives.
    pub fn teardown(self, drained: bool) -> Result<(), SessionError> {
        if !drained && self.data_dir.exists() {
            let kept = self.preserve_unsynced().map_err(|source| SessionError::Teardown {
                context: format!("preserve unsynced data from {}", self.data_dir.display()),
                source,
            })?;
            warn!("Session data was not synced; kept at {}", kept.display());
        }
        fsutil::remove_dir_if_exists(&self.root).map_err(|source| SessionError::Teardown {
            context: format!("remove sandbox {}", self.root.display()),
            source,
        })?;
        debug!("Removed sandbox {}", self.root.display());
        Ok(())
    }

    fn preserve_unsynced(&self) -> std::io::Result<PathBuf> {
        let parent = self
            .root
            .parent()
            .ok_or_else(|| std::io::Error::other("sandbox root has no parent"))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = parent.join(format!("{UNSYNCED_PREFIX}{stamp}"));
        fsutil::move_dir(&self.data_dir, &target)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransfer;
    use std::fs;
    use std::sync::Arc;

    fn synchronizer() -> Synchronizer {
        Synchronizer::new(Arc::new(MockTransfer::new()))
    }

    #[test]
    fn test_data_path_must_be_inside_home() {
        let err = SandboxManager::new("/tmp", Path::new("/home/me"), Path::new("/opt/game"))
            .unwrap_err();
        assert!(matches!(err, SessionError::EnvironmentSetup { .. }));
        assert!(SandboxManager::new("/tmp", Path::new("/home/me"), Path::new("/home/me")).is_err());
    }

    #[tokio::test]
    async fn test_prepare_populates_only_the_data_path() {
        let parent = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("user1.dat"), "progress").unwrap();

        let manager = SandboxManager::new(
            parent.path(),
            Path::new("/home/me"),
            Path::new("/home/me/AppData/LocalLow/Team Cherry/Hollow Knight"),
        )
        .unwrap();
        let sandbox = manager
            .prepare(&Endpoint::local(source.path(), "primary"), &synchronizer())
            .await
            .unwrap();

        assert_eq!(
            sandbox.data_dir(),
            sandbox.home().join("AppData/LocalLow/Team Cherry/Hollow Knight")
        );
        assert_eq!(
            fs::read_to_string(sandbox.data_dir().join("user1.dat")).unwrap(),
            "progress"
        );
        for dir in HOME_SKELETON {
            assert!(sandbox.home().join(dir).is_dir(), "{dir}");
        }
        assert_eq!(fs::read_dir(sandbox.home().join(".config")).unwrap().count(), 0);

        let root = sandbox.root().to_path_buf();
        sandbox.teardown(true).unwrap();
        assert!(!root.exists());
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_undrained_teardown_keeps_session_data() {
        let parent = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("user1.dat"), "start").unwrap();
        let manager = SandboxManager::new(
            parent.path(),
            Path::new("/home/me"),
            Path::new("/home/me/.local/share/game"),
        )
        .unwrap();
        let sandbox = manager
            .prepare(&Endpoint::local(source.path(), "primary"), &synchronizer())
            .await
            .unwrap();
        fs::write(sandbox.data_dir().join("user1.dat"), "progress").unwrap();
        let root = sandbox.root().to_path_buf();

        sandbox.teardown(false).unwrap();

        assert!(!root.exists());
        let kept: Vec<PathBuf> = fs::read_dir(parent.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].to_string_lossy().contains(UNSYNCED_PREFIX));
        assert_eq!(fs::read_to_string(kept[0].join("user1.dat")).unwrap(), "progress");
        assert_eq!(fs::read_to_string(source.path().join("user1.dat")).unwrap(), "start");
    }

    #[tokio::test]
    async fn test_failed_population_removes_sandbox() {
        let parent = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(
            parent.path(),
            Path::new("/home/me"),
            Path::new("/home/me/.local/share/game"),
        )
        .unwrap();
        let missing = Endpoint::local(parent.path().join("nope"), "missing");

        let err = manager.prepare(&missing, &synchronizer()).await.unwrap_err();
        assert!(matches!(err, SessionError::EnvironmentSetup { .. }));
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_env_overrides_point_into_sandbox() {
        let sandbox = Sandbox {
            root: PathBuf::from("/tmp/s"),
            home: PathBuf::from("/tmp/s/home"),
            data_dir: PathBuf::from("/tmp/s/home/.local/share/game"),
        };
        let env = sandbox.env_overrides();
        assert_eq!(env.len(), 8);
        assert_eq!(env.get("HOME"), Some(OsStr::new("/tmp/s/home")));
        assert_eq!(
            env.get("XDG_DATA_HOME").map(PathBuf::from),
            Some(PathBuf::from("/tmp/s/home/.local/share"))
        );
        assert_eq!(env.get("PATH"), None);
    }
}
