//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `SAVESYNC_*` environment variables with
//! validation and error collection.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Log level names accepted anywhere a level is configured.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "quiet", "off"];

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
/// Every getter returns `None` when the variable is unset, letting callers
/// layer the environment over file and built-in defaults.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the SAVESYNC_ prefix.
    pub fn new() -> Self {
        Self::with_prefix("SAVESYNC_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        env::var(&var_name).ok().map(|value| (var_name, value))
    }

    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.raw(name)
            .map(|(_, value)| value)
            .filter(|v| !v.is_empty())
    }

    /// Get a boolean value.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let (var_name, value) = self.raw(name)?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a u32 value with range validation.
    pub fn get_u32_range(&mut self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.get_u64_range(name, u64::from(min), u64::from(max))
            .and_then(|n| u32::try_from(n).ok())
    }

    /// Get a u64 value with range validation.
    pub fn get_u64_range(&mut self, name: &str, min: u64, max: u64) -> Option<u64> {
        let (var_name, value) = self.raw(name)?;
        match value.parse::<u64>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 64-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a path value. Existence is not checked.
    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.get_string(name).map(PathBuf::from)
    }

    /// Get a log level, validated against [`LOG_LEVELS`].
    pub fn get_log_level(&mut self, name: &str) -> Option<String> {
        let (var_name, value) = self.raw(name)?;
        let lower = value.to_lowercase();
        if LOG_LEVELS.contains(&lower.as_str()) {
            Some(lower)
        } else {
            self.errors.push(EnvError::InvalidLogLevel {
                var: var_name,
                value,
            });
            None
        }
    }

    /// Get a comma-separated list. Empty entries are dropped.
    pub fn get_list(&mut self, name: &str) -> Option<Vec<String>> {
        self.get_string(name).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
    }
}
