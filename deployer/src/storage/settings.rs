//! Settings file management

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::logs::LogLevel;

pub const HOST_ENV: &str = "DEPLOYER_HOST";
pub const PORT_ENV: &str = "DEPLOYER_PORT";
pub const LOG_LEVEL_ENV: &str = "DEPLOYER_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "DEPLOYER_LOG_JSON";
pub const LOG_DIR_ENV: &str = "DEPLOYER_LOG_DIR";
pub const DEPLOY_TIMEOUT_ENV: &str = "DEPLOYER_DEPLOY_TIMEOUT_SECS";
pub const PULL_ATTEMPTS_ENV: &str = "DEPLOYER_PULL_ATTEMPTS";

/// Deployer settings.
///
/// The auth token is deliberately not part of the settings file; it is read
/// from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to daily files in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment configuration
    #[serde(default)]
    pub deploy: DeploymentSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            deploy: DeploymentSettings::default(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// Overall deadline for one deployment, unset for none
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Image pull attempts
    #[serde(default = "default_pull_attempts")]
    pub pull_attempts: u32,
}

fn default_pull_attempts() -> u32 {
    1
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            pull_attempts: default_pull_attempts(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: &Path) -> Result<Self, DeployerError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            DeployerError::ConfigError(format!("Unable to read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Override settings from the process environment
    pub fn apply_env(&mut self) -> Result<(), DeployerError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override settings from `lookup`, ignoring unset and empty variables
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), DeployerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(host) = var(HOST_ENV) {
            self.server.host = host;
        }
        if let Some(port) = var(PORT_ENV) {
            self.server.port = parse(PORT_ENV, &port)?;
        }
        if let Some(level) = var(LOG_LEVEL_ENV) {
            self.log_level = level.parse().map_err(DeployerError::ConfigError)?;
        }
        if let Some(json) = var(LOG_JSON_ENV) {
            self.log_json = parse(LOG_JSON_ENV, &json)?;
        }
        if let Some(dir) = var(LOG_DIR_ENV) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(timeout) = var(DEPLOY_TIMEOUT_ENV) {
            self.deploy.timeout_secs = Some(parse(DEPLOY_TIMEOUT_ENV, &timeout)?);
        }
        if let Some(attempts) = var(PULL_ATTEMPTS_ENV) {
            self.deploy.pull_attempts = parse(PULL_ATTEMPTS_ENV, &attempts)?;
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, DeployerError> {
    value
        .parse()
        .map_err(|_| DeployerError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}
