//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, Query, Request, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    Form, Json,
};
use deploy_api::models::{ContainerSummary, DeployedContainer, HealthResponse, VersionResponse};
use serde::Deserialize;
use tracing::info;

use crate::deploy::config::{DeployConfig, FormDeployConfig};
use crate::deploy::status::list_containers;
use crate::errors::DeployerError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployer".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Container listing scope
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Include stopped containers
    #[serde(default)]
    pub all: bool,
}

/// Status query handler
pub async fn list_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ContainerSummary>>, DeployerError> {
    let containers = list_containers(state.engine.as_ref(), query.all).await?;
    Ok(Json(containers))
}

/// Deploy handler
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    DeployPayload(config): DeployPayload,
) -> Result<Json<DeployedContainer>, DeployerError> {
    info!("Deploy requested for {} with image {}", config.name, config.image);
    let deployed = state.orchestrator.deploy(&config).await?;
    Ok(Json(deployed))
}

/// Deploy request body, JSON or url-encoded form fields.
///
/// JSON is assumed unless the request says it is a form.
pub struct DeployPayload(pub DeployConfig);

impl<S> FromRequest<S> for DeployPayload
where
    S: Send + Sync,
{
    type Rejection = DeployerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(form) = Form::<FormDeployConfig>::from_request(req, state)
                .await
                .map_err(|e| DeployerError::ValidationError(e.body_text()))?;
            return Ok(Self(form.into()));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| DeployerError::ValidationError(e.body_text()))?;
        let config = serde_json::from_slice(&body)?;
        Ok(Self(config))
    }
}
