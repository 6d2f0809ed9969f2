//! Logging configuration

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::errors::DeployerError;

/// Default verbosity when `RUST_LOG` is unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = s.to_ascii_lowercase();
        serde_json::from_value(serde_json::Value::String(level))
            .map_err(|_| format!("Invalid log level: {}", s))
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level
    pub log_level: LogLevel,

    /// Write logs to stdout
    pub stdout: bool,

    /// Also write daily rolling log files to this directory
    pub log_dir: Option<PathBuf>,

    /// Enable JSON format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Initialize logging.
///
/// The returned guard flushes file output when dropped and must be kept
/// alive for the lifetime of the process.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, DeployerError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(options.log_level).into())
        .from_env_lossy();

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "deployer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let plain_layer = (options.stdout && !options.json_format).then(fmt::layer);
    let json_layer = (options.stdout && options.json_format).then(|| fmt::layer().json());

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(plain_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| DeployerError::ConfigError(e.to_string()))?;

    Ok(guard)
}
