//! Server state

use std::sync::Arc;

use crate::authn::gate::AuthGate;
use crate::deploy::orchestrator::Orchestrator;
use crate::engine::ContainerEngine;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: Arc<dyn ContainerEngine>,
    pub orchestrator: Arc<Orchestrator>,
    pub gate: Arc<AuthGate>,
}

impl ServerState {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        orchestrator: Arc<Orchestrator>,
        gate: Arc<AuthGate>,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            gate,
        }
    }
}
