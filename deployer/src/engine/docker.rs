//! Docker engine backed by the bollard client

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerSummary as DockerSummary, HostConfig, Mount, MountTypeEnum,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use chrono::DateTime;
use futures::stream::{BoxStream, StreamExt};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::engine::{
    ContainerEngine, ContainerFilter, ContainerSpec, ContainerSummary, CreatedContainer,
    EngineError, PullProgress, RegistryCredential, RestartPolicy,
};

impl From<BollardError> for EngineError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Daemon {
                status: status_code,
                message,
            },
            BollardError::DockerStreamError { error } => EngineError::Stream(error),
            other => EngineError::Transport(other.to_string()),
        }
    }
}

/// Container engine talking to the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Check the daemon is reachable
    pub async fn ping(&self) -> Result<(), EngineError> {
        let reply = self.docker.ping().await?;
        debug!("Docker daemon ping: {}", reply);
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(
        &self,
        filter: ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut filters = HashMap::new();
        if let Some(name) = filter.name {
            filters.insert("name".to_string(), vec![name]);
        }

        let options = ListContainersOptions {
            all: filter.all,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().map(summary_from_docker).collect())
    }

    fn pull_image<'a>(
        &'a self,
        image: &str,
        credential: Option<RegistryCredential>,
    ) -> BoxStream<'a, Result<PullProgress, EngineError>> {
        let (from_image, tag) = split_image_reference(image);
        info!("Pulling image {}:{}", from_image, tag);

        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        // bollard serializes the credential to JSON and base64 encodes it
        // into the X-Registry-Auth header
        let credentials = credential.map(|credential| DockerCredentials {
            username: Some(credential.username),
            password: Some(credential.password.expose_secret().to_string()),
            ..Default::default()
        });

        self.docker
            .create_image(Some(options), None, credentials)
            .map(|item| {
                item.map(|info| PullProgress {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                })
                .map_err(EngineError::from)
            })
            .boxed()
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<CreatedContainer, EngineError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;

        Ok(CreatedContainer {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mounts = spec
        .mounts
        .iter()
        .map(|mount| Mount {
            source: Some(mount.source.clone()),
            target: Some(mount.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            ..Default::default()
        })
        .collect();

    let restart_policy = match spec.restart_policy {
        RestartPolicy::UnlessStopped => DockerRestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        },
    };

    let host_config = HostConfig {
        restart_policy: Some(restart_policy),
        network_mode: spec.network.clone(),
        mounts: Some(mounts),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        tty: Some(spec.tty),
        env: Some(spec.env.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn summary_from_docker(container: DockerSummary) -> ContainerSummary {
    // Docker reports names with a leading slash
    let name = container
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();

    ContainerSummary {
        id: container.id.unwrap_or_default(),
        name,
        image: container.image.unwrap_or_default(),
        state: container.state.unwrap_or_default(),
        status: container.status.unwrap_or_default(),
        created_at: container
            .created
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

/// Split an image reference into the `fromImage` and `tag` pull parameters.
///
/// A reference without a tag or digest pulls `latest`; the daemon would
/// otherwise pull every tag of the repository.
pub fn split_image_reference(image: &str) -> (String, String) {
    if let Some((name, digest)) = image.split_once('@') {
        return (name.to_string(), digest.to_string());
    }

    // A colon before the last slash belongs to a registry port
    let last_segment = image.rfind('/').map_or(0, |idx| idx + 1);
    match image[last_segment..].rfind(':') {
        Some(idx) => {
            let split = last_segment + idx;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}
