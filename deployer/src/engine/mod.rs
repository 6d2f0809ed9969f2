//! Container engine gateway
//!
//! The deployer never talks to the daemon directly; it goes through
//! [`ContainerEngine`] so the orchestration can be exercised against the
//! in-memory engine as well as the real Docker daemon.

pub mod docker;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::SecretString;
use thiserror::Error;

pub use deploy_api::models::ContainerSummary;

/// Failure reported by the container engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("daemon responded with status {status}: {message}")]
    Daemon { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Container listing scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// Include stopped containers
    pub all: bool,

    /// Daemon side name filter. Docker treats this as a pattern, so callers
    /// needing an exact match must filter the result again.
    pub name: Option<String>,
}

/// Registry credential used for a single pull
#[derive(Debug)]
pub struct RegistryCredential {
    pub username: String,
    pub password: SecretString,
}

/// One item of the image pull progress stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

/// Host path exposed inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart unless explicitly stopped
    UnlessStopped,
}

/// Engine neutral container creation spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub tty: bool,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    pub mounts: Vec<BindMount>,
    pub restart_policy: RestartPolicy,
    /// Network to attach, `None` for the daemon default
    pub network: Option<String>,
}

/// Result of a successful create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    pub warnings: Vec<String>,
}

/// Capability interface over the container runtime daemon
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// List containers matching the filter
    async fn list_containers(
        &self,
        filter: ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Pull an image. The returned stream must be drained to completion for
    /// the pull to finish.
    fn pull_image<'a>(
        &'a self,
        image: &str,
        credential: Option<RegistryCredential>,
    ) -> BoxStream<'a, Result<PullProgress, EngineError>>;

    /// Stop a container using the daemon default grace period
    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    async fn create_container(&self, spec: &ContainerSpec)
        -> Result<CreatedContainer, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;
}
