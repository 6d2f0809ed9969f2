//! Rolling replacement of a single named container

use std::sync::Arc;
use std::time::Duration;

use deploy_api::models::DeployedContainer;
use futures::StreamExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::deploy::config::DeployConfig;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::locks::NameLocks;
use crate::engine::{ContainerEngine, ContainerFilter, ContainerSummary, EngineError};
use crate::errors::{DeployerError, EngineStep};
use crate::utils::{calc_exp_backoff, generate_uuid, CooldownOptions};

/// Deployment settings
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Deadline for a whole deployment, `None` waits as long as the engine does
    pub timeout: Option<Duration>,

    /// Pull attempts before giving up, 1 disables retries
    pub pull_attempts: u32,

    /// Backoff between pull attempts
    pub pull_cooldown: CooldownOptions,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            timeout: None,
            pull_attempts: 1,
            pull_cooldown: CooldownOptions::default(),
        }
    }
}

/// Runs deployments against a container engine
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    locks: NameLocks,
    settings: DeploySettings,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: DeploySettings) -> Self {
        Self {
            engine,
            locks: NameLocks::new(),
            settings,
        }
    }

    /// Replace the container named `config.name` with a fresh one running
    /// `config.image`.
    ///
    /// Steps run strictly in order and the first failure aborts the rest.
    /// Nothing is rolled back: a failure after the previous container was
    /// removed leaves no container running under that name.
    pub async fn deploy(&self, config: &DeployConfig) -> Result<DeployedContainer, DeployerError> {
        let span = info_span!(
            "deploy",
            id = %generate_uuid(),
            name = %config.name,
            image = %config.image,
        );

        async {
            let mut fsm = DeploymentFsm::new();
            let result = match self.settings.timeout {
                Some(limit) => {
                    let outcome = tokio::time::timeout(limit, self.execute(config, &mut fsm)).await;
                    // the step future is dropped here, the FSM holds the step it was in
                    outcome.unwrap_or_else(|_| {
                        Err(DeployerError::Timeout {
                            limit,
                            state: fsm.state(),
                        })
                    })
                }
                None => self.execute(config, &mut fsm).await,
            };

            match &result {
                Ok(_) => debug!(trail = ?fsm.trail(), "Deployment finished"),
                Err(e) => record_failure(&mut fsm, e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        config: &DeployConfig,
        fsm: &mut DeploymentFsm,
    ) -> Result<DeployedContainer, DeployerError> {
        // 1. Validate
        config.validate()?;
        advance(fsm, DeploymentEvent::Validated)?;

        // 2. Pull image
        self.pull(config).await?;
        advance(fsm, DeploymentEvent::Pulled)?;

        let _guard = self.locks.acquire(&config.name).await;
        debug!(names = self.locks.tracked(), "Holding deployment lock");

        // 3. Locate previous container
        let previous = self.locate_previous(&config.name).await?;

        if let Some(previous) = &previous {
            advance(fsm, DeploymentEvent::PreviousFound(previous.id.clone()))?;

            // 4. Stop previous, the daemon answers a stopped container with 304
            // which the client reports as success
            self.engine
                .stop_container(&previous.id)
                .await
                .map_err(DeployerError::engine(EngineStep::StopPrevious))?;
            advance(fsm, DeploymentEvent::Stopped)?;

            // 5. Remove previous
            self.engine
                .remove_container(&previous.id)
                .await
                .map_err(DeployerError::engine(EngineStep::RemovePrevious))?;
            advance(fsm, DeploymentEvent::Removed)?;
        } else {
            debug!("No previous container named {}", config.name);
            advance(fsm, DeploymentEvent::PreviousAbsent)?;
        }

        // 6. Create new container
        let created = self
            .engine
            .create_container(&config.container_spec())
            .await
            .map_err(DeployerError::engine(EngineStep::CreateNew))?;
        for warning in &created.warnings {
            warn!("Engine warning: {}", warning);
        }
        advance(fsm, DeploymentEvent::Created(created.id.clone()))?;

        // 7. Start new container
        self.engine
            .start_container(&created.id)
            .await
            .map_err(DeployerError::engine(EngineStep::StartNew))?;
        advance(fsm, DeploymentEvent::Started)?;

        info!("Deployed {} as container {}", config.image, created.id);

        Ok(DeployedContainer {
            id: created.id,
            name: config.name.clone(),
            image: config.image.clone(),
            state: "running".to_string(),
            warnings: created.warnings,
            replaced: previous.map(|previous| previous.id),
        })
    }

    async fn pull(&self, config: &DeployConfig) -> Result<(), DeployerError> {
        let attempts = self.settings.pull_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.pull_once(config).await {
                Ok(events) => {
                    info!("Pulled image {} ({} progress events)", config.image, events);
                    return Ok(());
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = calc_exp_backoff(&self.settings.pull_cooldown, attempt);
                    warn!(
                        "Pull of {} failed (attempt {}/{}): {}, retrying in {:?}",
                        config.image,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(DeployerError::RegistryError(e)),
            }
        }
    }

    /// Drain the pull stream; the image is only complete once it ends
    async fn pull_once(&self, config: &DeployConfig) -> Result<usize, EngineError> {
        let mut stream = self.engine.pull_image(&config.image, config.credential());
        let mut events = 0;

        while let Some(progress) = stream.next().await {
            let progress = progress?;
            events += 1;
            debug!(
                layer = progress.id.as_deref().unwrap_or_default(),
                progress = progress.progress.as_deref().unwrap_or_default(),
                "{}",
                progress.status.as_deref().unwrap_or_default()
            );
        }

        Ok(events)
    }

    async fn locate_previous(&self, name: &str) -> Result<Option<ContainerSummary>, DeployerError> {
        let filter = ContainerFilter {
            all: true,
            name: Some(name.to_string()),
        };
        let containers = self
            .engine
            .list_containers(filter)
            .await
            .map_err(DeployerError::engine(EngineStep::LocatePrevious))?;

        Ok(containers.into_iter().find(|container| container.name == name))
    }
}

fn record_failure(fsm: &mut DeploymentFsm, e: &DeployerError) {
    if let Err(transition) = fsm.process(DeploymentEvent::Fail(e.to_string())) {
        warn!("{}", transition);
    }
    // a failure past removal leaves the name without a running container
    error!(
        state = ?fsm.failed_at(),
        previous = fsm.previous_id().unwrap_or_default(),
        created = fsm.container_id().unwrap_or_default(),
        trail = ?fsm.trail(),
        "Deployment failed: {}",
        fsm.error().unwrap_or_default()
    );
}

fn advance(fsm: &mut DeploymentFsm, event: DeploymentEvent) -> Result<(), DeployerError> {
    let from = fsm.state();
    let to = fsm.process(event).map_err(DeployerError::Internal)?;
    debug!("Deployment state {:?} -> {:?}", from, to);
    Ok(())
}
