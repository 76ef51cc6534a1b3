//! Logging initialisation.
//!
//! All components log through `tracing`; this module builds the subscriber
//! once at startup. Output goes to stderr by default, or to a file through a
//! non-blocking `tracing-appender` writer.

use crate::config::EnvParser;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Write to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Build from `SAVESYNC_LOG_LEVEL`, `SAVESYNC_LOG_FORMAT` and
    /// `SAVESYNC_LOG_FILE`, falling back to `default_level`.
    ///
    /// Invalid values are ignored; logging is not up yet to report them.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser
            .get_log_level("LOG_LEVEL")
            .unwrap_or_else(|| default_level.to_string());
        let format = parser
            .get_string("LOG_FORMAT")
            .and_then(|f| f.parse().ok())
            .unwrap_or_default();
        let file = parser.get_path("LOG_FILE");
        Self {
            level,
            format,
            file,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter directive for the configured level. `quiet` is `off`.
    pub fn filter_directive(&self) -> String {
        match self.level.as_str() {
            "quiet" => "off".to_string(),
            level => level.to_string(),
        }
    }
}

/// Keeps the non-blocking writer flushing until dropped.
#[must_use = "dropping the guards stops log output"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> std::io::Result<LoggingGuards> {
    let filter = EnvFilter::try_new(config.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let ansi = config.file.is_none();
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(format_layer(config.format, writer, ansi))
        .try_init();
    result.map_err(std::io::Error::other)?;

    Ok(LoggingGuards {
        _guards: vec![guard],
    })
}

/// The fmt layer for `format`, writing to `writer`.
fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_target(false)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    }
}
