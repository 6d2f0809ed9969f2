//! In-memory container engine.
//!
//! Mimics the daemon semantics the orchestrator relies on (name conflicts,
//! stopping a stopped container succeeding, refusing to remove a running
//! one) and records every call so tests can assert on ordering. Calls can be
//! made to fail or to stall.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::engine::{
    ContainerEngine, ContainerFilter, ContainerSpec, ContainerSummary, CreatedContainer,
    EngineError, PullProgress, RegistryCredential,
};

/// Engine operation, used for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    List,
    Pull,
    Stop,
    Remove,
    Create,
    Start,
}

/// A recorded engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    List(ContainerFilter),
    Pull {
        image: String,
        username: Option<String>,
    },
    Stop(String),
    Remove(String),
    Create(ContainerSpec),
    Start(String),
}

impl EngineCall {
    pub fn op(&self) -> EngineOp {
        match self {
            EngineCall::List(_) => EngineOp::List,
            EngineCall::Pull { .. } => EngineOp::Pull,
            EngineCall::Stop(_) => EngineOp::Stop,
            EngineCall::Remove(_) => EngineOp::Remove,
            EngineCall::Create(_) => EngineOp::Create,
            EngineCall::Start(_) => EngineOp::Start,
        }
    }
}

#[derive(Default)]
struct Inner {
    containers: Vec<ContainerSummary>,
    calls: Vec<EngineCall>,
    failures: HashSet<EngineOp>,
    delays: HashMap<EngineOp, Duration>,
    next_id: u64,
}

/// Container engine keeping its state in memory
#[derive(Default)]
pub struct MemoryEngine {
    inner: Mutex<Inner>,
    pull_layers: usize,
    progress_consumed: Arc<AtomicUsize>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            pull_layers: 3,
            ..Default::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an existing container
    pub fn with_container(self, id: &str, name: &str, image: &str, state: &str) -> Self {
        self.lock().containers.push(ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            state: state.to_string(),
            status: String::new(),
            created_at: None,
        });
        self
    }

    /// Make every subsequent call of `op` fail
    pub fn fail_on(&self, op: EngineOp) {
        self.lock().failures.insert(op);
    }

    /// Make every subsequent call of `op` wait `delay` before it runs
    pub fn delay_on(&self, op: EngineOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls that change daemon state
    pub fn mutations(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, EngineCall::List(_) | EngineCall::Pull { .. }))
            .collect()
    }

    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.lock().containers.clone()
    }

    /// Number of pull progress items read by the caller so far
    pub fn progress_consumed(&self) -> usize {
        self.progress_consumed.load(Ordering::SeqCst)
    }

    async fn pause(&self, op: EngineOp) {
        let delay = self.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, call: EngineCall) -> Result<MutexGuard<'_, Inner>, EngineError> {
        let op = call.op();
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.failures.contains(&op) {
            return Err(EngineError::Transport(format!("injected {:?} failure", op)));
        }
        Ok(inner)
    }
}

fn no_such_container(id: &str) -> EngineError {
    EngineError::Daemon {
        status: 404,
        message: format!("No such container: {}", id),
    }
}

#[async_trait]
impl ContainerEngine for MemoryEngine {
    async fn list_containers(
        &self,
        filter: ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        self.pause(EngineOp::List).await;
        let inner = self.record(EngineCall::List(filter.clone()))?;
        Ok(inner
            .containers
            .iter()
            .filter(|container| filter.all || container.state == "running")
            // the daemon name filter is a pattern match, not equality
            .filter(|container| {
                filter
                    .name
                    .as_deref()
                    .map_or(true, |name| container.name.contains(name))
            })
            .cloned()
            .collect())
    }

    fn pull_image<'a>(
        &'a self,
        image: &str,
        credential: Option<RegistryCredential>,
    ) -> BoxStream<'a, Result<PullProgress, EngineError>> {
        let call = EngineCall::Pull {
            image: image.to_string(),
            username: credential.map(|credential| credential.username),
        };
        let failed = self.record(call).is_err();

        let mut items: Vec<Result<PullProgress, EngineError>> = (0..self.pull_layers)
            .map(|layer| {
                Ok(PullProgress {
                    id: Some(format!("layer-{}", layer)),
                    status: Some("Pull complete".to_string()),
                    progress: None,
                })
            })
            .collect();
        if failed {
            items.push(Err(EngineError::Stream(format!(
                "pull access denied for {}",
                image
            ))));
        } else {
            items.push(Ok(PullProgress {
                status: Some(format!("Downloaded newer image for {}", image)),
                ..Default::default()
            }));
        }

        let consumed = self.progress_consumed.clone();
        stream::iter(items)
            .inspect(move |_| {
                consumed.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.pause(EngineOp::Stop).await;
        let mut inner = self.record(EngineCall::Stop(id.to_string()))?;
        let container = inner
            .containers
            .iter_mut()
            .find(|container| container.id == id)
            .ok_or_else(|| no_such_container(id))?;

        // the daemon answers 304 here, which the client treats as success
        if container.state == "running" {
            container.state = "exited".to_string();
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.pause(EngineOp::Remove).await;
        let mut inner = self.record(EngineCall::Remove(id.to_string()))?;
        let idx = inner
            .containers
            .iter()
            .position(|container| container.id == id)
            .ok_or_else(|| no_such_container(id))?;

        if inner.containers[idx].state == "running" {
            return Err(EngineError::Daemon {
                status: 409,
                message: format!("cannot remove running container {}", id),
            });
        }
        inner.containers.remove(idx);
        Ok(())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<CreatedContainer, EngineError> {
        self.pause(EngineOp::Create).await;
        let mut inner = self.record(EngineCall::Create(spec.clone()))?;
        if inner.containers.iter().any(|container| container.name == spec.name) {
            return Err(EngineError::Daemon {
                status: 409,
                message: format!("container name \"/{}\" is already in use", spec.name),
            });
        }

        inner.next_id += 1;
        let id = format!("mem-{:04}", inner.next_id);
        inner.containers.push(ContainerSummary {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "created".to_string(),
            status: String::new(),
            created_at: None,
        });

        Ok(CreatedContainer {
            id,
            warnings: vec![],
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.pause(EngineOp::Start).await;
        let mut inner = self.record(EngineCall::Start(id.to_string()))?;
        let container = inner
            .containers
            .iter_mut()
            .find(|container| container.id == id)
            .ok_or_else(|| no_such_container(id))?;
        container.state = "running".to_string();
        Ok(())
    }
}
