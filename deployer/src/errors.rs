//! Error types for the deployer

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::deploy::fsm::DeploymentState;
use crate::engine::EngineError;

/// Engine call that failed, used to tell the caller where a deployment stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStep {
    ListContainers,
    LocatePrevious,
    StopPrevious,
    RemovePrevious,
    CreateNew,
    StartNew,
}

impl fmt::Display for EngineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            EngineStep::ListContainers => "listing containers",
            EngineStep::LocatePrevious => "locating previous container",
            EngineStep::StopPrevious => "stopping previous container",
            EngineStep::RemovePrevious => "removing previous container",
            EngineStep::CreateNew => "creating new container",
            EngineStep::StartNew => "starting new container",
        };
        f.write_str(step)
    }
}

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Registry error: {0}")]
    RegistryError(#[source] EngineError),

    #[error("Engine error while {step}: {source}")]
    EngineError {
        step: EngineStep,
        #[source]
        source: EngineError,
    },

    #[error("Deployment timed out after {limit:?} while {state}")]
    Timeout {
        limit: Duration,
        state: DeploymentState,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    pub fn engine(step: EngineStep) -> impl FnOnce(EngineError) -> Self {
        move |source| DeployerError::EngineError { step, source }
    }

    /// Short machine readable kind used in error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            DeployerError::ValidationError(_) | DeployerError::JsonError(_) => "validation",
            DeployerError::AuthError(_) => "unauthorized",
            DeployerError::RegistryError(_) => "registry",
            DeployerError::EngineError { .. } => "engine",
            DeployerError::Timeout { .. } => "timeout",
            _ => "internal",
        }
    }
}
