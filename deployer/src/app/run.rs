//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::authn::gate::AuthGate;
use crate::deploy::orchestrator::Orchestrator;
use crate::engine::ContainerEngine;
use crate::errors::DeployerError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the deployer until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    engine: Arc<dyn ContainerEngine>,
    gate: AuthGate,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployerError> {
    info!("Initializing deployer...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init_socket_server(
        &options,
        engine,
        gate,
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await
    {
        error!("Failed to start deployer: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init_socket_server(
    options: &AppOptions,
    engine: Arc<dyn ContainerEngine>,
    gate: AuthGate,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployerError> {
    info!("Initializing HTTP server...");

    let orchestrator = Arc::new(Orchestrator::new(engine.clone(), options.deploy.clone()));
    let server_state = ServerState::new(engine, orchestrator, Arc::new(gate));

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    socket_server_handle: Option<JoinHandle<Result<(), DeployerError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            socket_server_handle: None,
        }
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeployerError>>,
    ) -> Result<(), DeployerError> {
        if self.socket_server_handle.is_some() {
            return Err(DeployerError::ShutdownError(
                "server_handle already set".to_string(),
            ));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployerError> {
        let _ = self.shutdown_tx.send(());

        // in-flight deployments finish before the server stops, unless they
        // outlast the shutdown delay
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(DeployerError::ShutdownError(format!(
                    "timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployerError> {
        info!("Shutting down deployer...");

        if let Some(handle) = self.socket_server_handle.take() {
            handle
                .await
                .map_err(|e| DeployerError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
