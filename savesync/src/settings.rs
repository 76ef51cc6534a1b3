//! Layered settings: defaults < config file < `SAVESYNC_*` environment < flags.

use crate::LaunchArgs;
use anyhow::{Context, Result, bail};
use savesync_core::config::{DEFAULT_DEBOUNCE, DEFAULT_RCLONE_RETRIES, default_lock_path};
use savesync_core::transfer::bundled_rclone_path;
use savesync_core::{EndpointRegistry, EnvParser, FileConfig, RcloneOptions, SessionConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_DEBOUNCE_MS: u64 = 10 * 60 * 1000;
const MAX_RCLONE_RETRIES: u32 = 100;

#[derive(Debug, Clone)]
pub struct Settings {
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    pub install_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub home_dir: Option<PathBuf>,
    pub isolate: bool,
    pub lock_path: PathBuf,
    pub debounce: Duration,
    pub sync_on_exit: bool,
    pub targets: Vec<String>,
    pub rclone_binary: Option<PathBuf>,
    /// rclone shipped beside our executable. `clean` deletes it.
    pub bundled_rclone: Option<PathBuf>,
    pub rclone_config: PathBuf,
    pub rclone_retries: u32,
    pub quiet: bool,
}

impl Settings {
    pub fn resolve(file: FileConfig, flags: &LaunchArgs, quiet: bool) -> Result<Self> {
        let env = EnvLayer::read(&mut EnvParser::new())?;
        Self::layer(file, env, flags, quiet)
    }

    fn layer(file: FileConfig, env: EnvLayer, flags: &LaunchArgs, quiet: bool) -> Result<Self> {
        let session = file.session;
        let rclone = file.rclone;

        let targets = if !flags.targets.is_empty() {
            flags.targets.clone()
        } else {
            env.targets.unwrap_or(session.targets)
        };

        let args = if flags.args.is_empty() {
            session.args
        } else {
            flags.args.clone()
        };

        let isolate = if flags.no_isolate {
            false
        } else {
            env.isolate.or(session.isolate).unwrap_or(true)
        };

        let debounce = flags
            .debounce_ms
            .or(env.debounce_ms)
            .or(session.debounce_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE);

        let lock_path = flags
            .lock_file
            .clone()
            .or(env.lock_file)
            .or(session.lock_file)
            .or_else(default_lock_path)
            .context("Cannot determine a location for the lock file; pass --lock-file")?;

        let bundled_rclone = bundled_rclone_path();
        let rclone_config = flags
            .rclone_config
            .clone()
            .or(env.rclone_config)
            .or(rclone.config_path)
            .or_else(|| default_rclone_config(bundled_rclone.as_deref()))
            .context("Cannot determine the rclone config location; pass --rclone-config")?;

        Ok(Self {
            executable: flags.executable.clone().or(env.executable).or(session.executable),
            args,
            install_path: flags.install_path.clone().or(env.install_path).or(session.install_path),
            data_path: flags.data_path.clone().or(env.data_path).or(session.data_path),
            home_dir: flags.home_dir.clone().or(env.home_dir).or(session.home_dir),
            isolate,
            lock_path,
            debounce,
            sync_on_exit: flags.sync_on_exit
                || env.sync_on_exit.or(session.sync_on_exit).unwrap_or(false),
            targets,
            rclone_binary: flags.rclone.clone().or(env.rclone).or(rclone.binary),
            bundled_rclone,
            rclone_config,
            rclone_retries: flags
                .rclone_retries
                .or(env.rclone_retries)
                .or(rclone.retries)
                .unwrap_or(DEFAULT_RCLONE_RETRIES),
            quiet,
        })
    }

    pub fn registry(&self) -> Result<EndpointRegistry> {
        Ok(EndpointRegistry::from_specs(&self.targets, self.sync_on_exit)?)
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        let executable = self
            .executable
            .clone()
            .context("No game executable configured; pass --executable")?;
        let mut config = SessionConfig::new(executable, self.registry()?);
        config.args = self.args.clone();
        config.install_path = self.install_path.clone();
        config.data_path = self.data_path.clone();
        config.home_dir = self.home_dir.clone();
        config.isolate = self.isolate;
        config.lock_path = self.lock_path.clone();
        config.debounce = self.debounce;
        Ok(config)
    }

    pub fn rclone_options(&self) -> RcloneOptions {
        RcloneOptions {
            binary: self.rclone_binary.clone(),
            config_path: self.rclone_config.clone(),
            retries: self.rclone_retries,
            quiet: self.quiet,
        }
    }
}

/// Values read from `SAVESYNC_*` variables.
#[derive(Debug, Default)]
struct EnvLayer {
    targets: Option<Vec<String>>,
    executable: Option<PathBuf>,
    install_path: Option<PathBuf>,
    data_path: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    isolate: Option<bool>,
    sync_on_exit: Option<bool>,
    debounce_ms: Option<u64>,
    lock_file: Option<PathBuf>,
    rclone: Option<PathBuf>,
    rclone_config: Option<PathBuf>,
    rclone_retries: Option<u32>,
}

impl EnvLayer {
    /// Read every variable, reporting all invalid ones together.
    fn read(env: &mut EnvParser) -> Result<Self> {
        let layer = Self {
            targets: env.get_list("TARGETS"),
            executable: env.get_path("EXECUTABLE"),
            install_path: env.get_path("INSTALL_PATH"),
            data_path: env.get_path("DATA_PATH"),
            home_dir: env.get_path("HOME"),
            isolate: env.get_bool("ISOLATE"),
            sync_on_exit: env.get_bool("SYNC_ON_EXIT"),
            debounce_ms: env.get_u64_range("DEBOUNCE_MS", 0, MAX_DEBOUNCE_MS),
            lock_file: env.get_path("LOCK_FILE"),
            rclone: env.get_path("RCLONE"),
            rclone_config: env.get_path("RCLONE_CONFIG"),
            rclone_retries: env.get_u32_range("RCLONE_RETRIES", 0, MAX_RCLONE_RETRIES),
        };
        let errors = env.take_errors();
        if !errors.is_empty() {
            let list: Vec<String> = errors.iter().map(ToString::to_string).collect();
            bail!("Invalid environment:\n  {}", list.join("\n  "));
        }
        Ok(layer)
    }
}

/// `rclone.conf` beside our executable, like a bundled rclone.
fn default_rclone_config(bundled: Option<&Path>) -> Option<PathBuf> {
    bundled
        .and_then(|p| p.parent().map(|dir| dir.join("rclone.conf")))
        .or_else(|| dirs::config_dir().map(|d| d.join("savesync").join("rclone.conf")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(toml: &str) -> FileConfig {
        FileConfig::parse(toml).unwrap()
    }

    fn pinned_paths() -> LaunchArgs {
        LaunchArgs {
            lock_file: Some(PathBuf::from("/tmp/savesync-test.lock")),
            rclone_config: Some(PathBuf::from("/tmp/rclone.conf")),
            ..LaunchArgs::default()
        }
    }

    #[test]
    fn test_flags_beat_file() {
        let file = file(
            r#"
[session]
executable = "/games/file/game"
targets = ["/saves/from-file"]
debounce_ms = 500

[rclone]
retries = 2
"#,
        );
        let flags = LaunchArgs {
            targets: vec!["/saves/from-flag".into()],
            debounce_ms: Some(100),
            ..pinned_paths()
        };
        let settings = Settings::layer(file, EnvLayer::default(), &flags, false).unwrap();

        assert_eq!(settings.targets, vec!["/saves/from-flag".to_string()]);
        assert_eq!(settings.debounce, Duration::from_millis(100));
        assert_eq!(settings.executable, Some(PathBuf::from("/games/file/game")));
        assert_eq!(settings.rclone_retries, 2);
        assert!(settings.isolate);
    }

    #[test]
    fn test_env_sits_between_file_and_flags() {
        let file = file("[session]\ntargets = [\"/saves/from-file\"]\nisolate = true\n");
        let env = EnvLayer {
            targets: Some(vec!["/saves/env-a".into(), "gdrive:/saves|60".into()]),
            isolate: Some(false),
            rclone_retries: Some(9),
            ..EnvLayer::default()
        };
        let settings = Settings::layer(file, env, &pinned_paths(), false).unwrap();

        assert_eq!(settings.targets.len(), 2);
        assert!(!settings.isolate);
        assert_eq!(settings.rclone_retries, 9);
        assert_eq!(settings.registry().unwrap().len(), 2);

        let flags = LaunchArgs {
            no_isolate: true,
            rclone_retries: Some(1),
            ..pinned_paths()
        };
        let env = EnvLayer {
            isolate: Some(true),
            rclone_retries: Some(9),
            ..EnvLayer::default()
        };
        let settings = Settings::layer(FileConfig::default(), env, &flags, false).unwrap();
        assert!(!settings.isolate);
        assert_eq!(settings.rclone_retries, 1);
    }

    #[test]
    fn test_defaults() {
        let settings =
            Settings::layer(FileConfig::default(), EnvLayer::default(), &pinned_paths(), true)
                .unwrap();
        assert_eq!(settings.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(settings.rclone_retries, DEFAULT_RCLONE_RETRIES);
        assert!(!settings.sync_on_exit);
        assert!(settings.rclone_options().quiet);
    }

    #[test]
    fn test_missing_executable() {
        let settings =
            Settings::layer(FileConfig::default(), EnvLayer::default(), &pinned_paths(), false)
                .unwrap();
        assert!(settings.session_config().is_err());
    }

    #[test]
    fn test_malformed_target_is_rejected() {
        let flags = LaunchArgs {
            executable: Some(PathBuf::from("/games/hk/game")),
            targets: vec!["/saves|soon".into()],
            ..pinned_paths()
        };
        let settings =
            Settings::layer(FileConfig::default(), EnvLayer::default(), &flags, false).unwrap();
        assert!(settings.session_config().is_err());
    }
}
