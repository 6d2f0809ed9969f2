//! Container status query

use tracing::debug;

use crate::engine::{ContainerEngine, ContainerFilter, ContainerSummary};
use crate::errors::{DeployerError, EngineStep};

/// List the containers known to the engine, unfiltered.
///
/// Only running containers are returned unless `all` is set.
pub async fn list_containers(
    engine: &dyn ContainerEngine,
    all: bool,
) -> Result<Vec<ContainerSummary>, DeployerError> {
    let containers = engine
        .list_containers(ContainerFilter { all, name: None })
        .await
        .map_err(DeployerError::engine(EngineStep::ListContainers))?;

    debug!("Engine reported {} containers", containers.len());
    Ok(containers)
}
