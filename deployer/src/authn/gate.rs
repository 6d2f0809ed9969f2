//! Shared secret authentication

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::DeployerError;

/// Environment variable holding the shared secret
pub const TOKEN_ENV: &str = "DEPLOYER_TOKEN";

/// Checks the `Authorization` header against the configured secret
#[derive(Debug)]
pub struct AuthGate {
    secret: SecretString,
}

impl AuthGate {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Build the gate from [`TOKEN_ENV`], refusing an unset or empty secret
    pub fn from_env() -> Result<Self, DeployerError> {
        match std::env::var(TOKEN_ENV) {
            Ok(secret) if !secret.is_empty() => Ok(Self::new(SecretString::from(secret))),
            _ => Err(DeployerError::ConfigError(format!(
                "Define {} env variable before running the deployer",
                TOKEN_ENV
            ))),
        }
    }

    /// Allow only a non-empty header that matches the secret exactly
    pub fn authorize(&self, header: Option<&str>) -> Result<(), DeployerError> {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            return Err(DeployerError::AuthError(
                "no deployer token configured".to_string(),
            ));
        }

        match header {
            None | Some("") => {
                debug!("Missing Authorization header");
                Err(DeployerError::AuthError(
                    "missing Authorization header".to_string(),
                ))
            }
            Some(value) if value == secret => Ok(()),
            Some(_) => {
                debug!("Authorization header does not match");
                Err(DeployerError::AuthError("invalid token".to_string()))
            }
        }
    }
}
