//! Application configuration options

use std::time::Duration;

use crate::deploy::orchestrator::DeploySettings;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment settings
    pub deploy: DeploySettings,
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            deploy: DeploySettings {
                timeout: settings.deploy.timeout_secs.map(Duration::from_secs),
                pull_attempts: settings.deploy.pull_attempts,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}
