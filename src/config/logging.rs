//! `logging` section of the gate configuration.

use super::defaults::{
    default_enable_file_logging, default_log_dir, default_log_filename, default_log_format,
    default_rotation,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where and how the gate writes its tracing output.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Directory receiving rolled log files when file output is on
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Prefix of each rolled file
    #[serde(default = "default_log_filename")]
    pub filename: String,
    /// One of `minutely`, `hourly`, `daily` or `never`
    #[serde(default = "default_rotation")]
    pub rotation: String,
    /// Filter level. Unset means `RUST_LOG`, or `info` when that is unset too
    #[serde(default)]
    pub level: Option<LogLevel>,
    /// Mirror stdout output into the rolling file writer
    #[serde(default = "default_enable_file_logging")]
    pub enable_file_logging: bool,
    /// Rendering of each event
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filename: default_log_filename(),
            rotation: default_rotation(),
            level: None,
            enable_file_logging: default_enable_file_logging(),
            format: default_log_format(),
        }
    }
}

/// Verbosity accepted in `logging.level`. Parsing also takes `warning` and `err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "err" => Ok(Self::Error),
            other => Err(serde::de::Error::custom(format!(
                "invalid log level '{other}', expected one of: trace, debug, info, warn, error"
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `json` events for collectors, `text` for terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}
