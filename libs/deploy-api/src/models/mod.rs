//! Deployer API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// A container as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state, e.g. `running`, `exited`, `created`
    pub state: String,
    /// Human readable status, e.g. `Up 3 minutes`
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Container created and started by a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Id of the container this deployment replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
}

/// Error body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error kind, e.g. `validation`, `unauthorized`, `engine`
    pub error: String,
    pub message: String,
}
