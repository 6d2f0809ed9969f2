//! Finite State Machine for a single rolling replacement

use std::fmt;

use serde::Serialize;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Checking the request payload
    Validating,

    /// Pulling the image with the registry credential
    AuthenticatingPull,

    /// Looking for a container with the same name
    LocatingPrevious,

    StoppingPrevious,

    RemovingPrevious,

    CreatingNew,

    StartingNew,

    /// Replacement container is running
    Done,

    /// A step failed, see [`DeploymentFsm::error`]
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Done | DeploymentState::Failed)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            DeploymentState::Validating => "validating request",
            DeploymentState::AuthenticatingPull => "pulling image",
            DeploymentState::LocatingPrevious => "locating previous container",
            DeploymentState::StoppingPrevious => "stopping previous container",
            DeploymentState::RemovingPrevious => "removing previous container",
            DeploymentState::CreatingNew => "creating new container",
            DeploymentState::StartingNew => "starting new container",
            DeploymentState::Done => "done",
            DeploymentState::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Payload accepted
    Validated,

    /// Image pull stream fully drained
    Pulled,

    /// A container with the same name exists
    PreviousFound(String),

    /// First deployment for this name
    PreviousAbsent,

    Stopped,

    Removed,

    /// Replacement created with the given id
    Created(String),

    Started,

    /// Current step failed
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
    failed_at: Option<DeploymentState>,
    previous_id: Option<String>,
    container_id: Option<String>,
    trail: Vec<DeploymentState>,
}

impl DeploymentFsm {
    /// Create a new FSM in validating state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Validating,
            error: None,
            failed_at: None,
            previous_id: None,
            container_id: None,
            trail: vec![DeploymentState::Validating],
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// State the deployment was in when it failed
    pub fn failed_at(&self) -> Option<DeploymentState> {
        self.failed_at
    }

    /// Id of the container being replaced
    pub fn previous_id(&self) -> Option<&str> {
        self.previous_id.as_deref()
    }

    /// Id of the replacement container once created
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Every state visited, in order
    pub fn trail(&self) -> &[DeploymentState] {
        &self.trail
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentState, String> {
        let new_state = match (self.state, event) {
            (DeploymentState::Validating, DeploymentEvent::Validated) => {
                DeploymentState::AuthenticatingPull
            }
            (DeploymentState::AuthenticatingPull, DeploymentEvent::Pulled) => {
                DeploymentState::LocatingPrevious
            }

            // Previous container lookup
            (DeploymentState::LocatingPrevious, DeploymentEvent::PreviousFound(id)) => {
                self.previous_id = Some(id);
                DeploymentState::StoppingPrevious
            }
            (DeploymentState::LocatingPrevious, DeploymentEvent::PreviousAbsent) => {
                DeploymentState::CreatingNew
            }
            (DeploymentState::StoppingPrevious, DeploymentEvent::Stopped) => {
                DeploymentState::RemovingPrevious
            }
            (DeploymentState::RemovingPrevious, DeploymentEvent::Removed) => {
                DeploymentState::CreatingNew
            }

            // Replacement
            (DeploymentState::CreatingNew, DeploymentEvent::Created(id)) => {
                self.container_id = Some(id);
                DeploymentState::StartingNew
            }
            (DeploymentState::StartingNew, DeploymentEvent::Started) => DeploymentState::Done,

            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err);
                self.failed_at = Some(state);
                DeploymentState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.trail.push(new_state);
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
