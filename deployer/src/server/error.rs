//! HTTP mapping of deployer errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use deploy_api::models::ErrorResponse;

use crate::errors::{DeployerError, EngineStep};

impl DeployerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeployerError::ValidationError(_) | DeployerError::JsonError(_) => {
                StatusCode::BAD_REQUEST
            }
            DeployerError::AuthError(_) => StatusCode::UNAUTHORIZED,
            DeployerError::RegistryError(_) => StatusCode::BAD_GATEWAY,
            DeployerError::EngineError {
                step: EngineStep::ListContainers,
                ..
            } => StatusCode::INTERNAL_SERVER_ERROR,
            DeployerError::EngineError { .. } => StatusCode::BAD_GATEWAY,
            DeployerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DeployerError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
