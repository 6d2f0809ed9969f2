//! Orchestrator tests against the in-memory engine

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use deployer::deploy::config::DeployConfig;
use deployer::deploy::fsm::DeploymentState;
use deployer::deploy::orchestrator::{DeploySettings, Orchestrator};
use deployer::engine::memory::{EngineCall, EngineOp, MemoryEngine};
use deployer::errors::{DeployerError, EngineStep};
use deployer::utils::CooldownOptions;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn config(value: serde_json::Value) -> DeployConfig {
    serde_json::from_value(value).unwrap()
}

fn web(image: &str) -> DeployConfig {
    config(json!({"name": "web", "image": image}))
}

fn orchestrator(engine: &Arc<MemoryEngine>) -> Orchestrator {
    Orchestrator::new(engine.clone(), DeploySettings::default())
}

fn ops(calls: &[EngineCall]) -> Vec<EngineOp> {
    calls.iter().map(EngineCall::op).collect()
}

#[tokio::test]
async fn test_first_deploy_skips_stop_and_remove() {
    let engine = Arc::new(MemoryEngine::new());

    let deployed = assert_ok!(orchestrator(&engine).deploy(&web("app:v1")).await);

    assert_eq!(ops(&engine.mutations()), vec![EngineOp::Create, EngineOp::Start]);
    assert_eq!(deployed.name, "web");
    assert_eq!(deployed.state, "running");
    assert!(deployed.replaced.is_none());

    let containers = engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, deployed.id);
    assert_eq!(containers[0].state, "running");
}

#[tokio::test]
async fn test_replacement_runs_steps_in_order() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));

    let deployed = assert_ok!(orchestrator(&engine).deploy(&web("app:v2")).await);

    let calls = engine.calls();
    assert_eq!(
        ops(&calls),
        vec![
            EngineOp::Pull,
            EngineOp::List,
            EngineOp::Stop,
            EngineOp::Remove,
            EngineOp::Create,
            EngineOp::Start,
        ]
    );
    assert_eq!(calls[2], EngineCall::Stop("c1".to_string()));
    assert_eq!(calls[3], EngineCall::Remove("c1".to_string()));
    assert_eq!(calls[5], EngineCall::Start(deployed.id.clone()));
    assert_eq!(deployed.replaced.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_web_app_v2_replaces_c1() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    let request = config(json!({
        "user": "u",
        "token": "t",
        "name": "web",
        "image": "app:v2",
        "network": "default",
        "env": {"MODE": "prod"},
        "volumes": [],
        "tty": false
    }));

    let deployed = assert_ok!(orchestrator(&engine).deploy(&request).await);

    let calls = engine.calls();
    assert_eq!(
        calls[0],
        EngineCall::Pull {
            image: "app:v2".to_string(),
            username: Some("u".to_string()),
        }
    );

    let spec = calls
        .iter()
        .find_map(|call| match call {
            EngineCall::Create(spec) => Some(spec.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(spec.name, "web");
    assert_eq!(spec.image, "app:v2");
    assert_eq!(spec.env, vec!["MODE=prod".to_string()]);
    assert_eq!(spec.network.as_deref(), Some("default"));
    assert!(spec.mounts.is_empty());
    assert!(!spec.tty);

    assert_ne!(deployed.id, "c1");
    let containers = engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].image, "app:v2");
    assert_eq!(containers[0].state, "running");
}

#[tokio::test]
async fn test_env_map_reaches_container_unchanged() {
    let engine = Arc::new(MemoryEngine::new());
    let request = config(json!({
        "name": "web",
        "image": "app:v1",
        "env": {"A": "1", "B": "2"}
    }));

    assert_ok!(orchestrator(&engine).deploy(&request).await);

    let env: HashSet<String> = engine
        .calls()
        .into_iter()
        .find_map(|call| match call {
            EngineCall::Create(spec) => Some(spec.env.into_iter().collect()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        env,
        HashSet::from(["A=1".to_string(), "B=2".to_string()])
    );
}

#[tokio::test]
async fn test_anonymous_pull_without_credentials() {
    let engine = Arc::new(MemoryEngine::new());

    assert_ok!(orchestrator(&engine).deploy(&web("app:v1")).await);

    assert_eq!(
        engine.calls()[0],
        EngineCall::Pull {
            image: "app:v1".to_string(),
            username: None,
        }
    );
}

#[tokio::test]
async fn test_pull_failure_leaves_previous_untouched() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    engine.fail_on(EngineOp::Pull);

    let err = assert_err!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert!(matches!(err, DeployerError::RegistryError(_)));
    assert!(engine.mutations().is_empty());
    let containers = engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "c1");
    assert_eq!(containers[0].state, "running");
}

#[tokio::test]
async fn test_pull_stream_is_drained_before_create() {
    let engine = Arc::new(MemoryEngine::new());

    assert_ok!(orchestrator(&engine).deploy(&web("app:v1")).await);

    // three layers and the final status line
    assert_eq!(engine.progress_consumed(), 4);
}

#[tokio::test]
async fn test_pull_is_retried_when_configured() {
    let engine = Arc::new(MemoryEngine::new());
    engine.fail_on(EngineOp::Pull);
    let settings = DeploySettings {
        pull_attempts: 3,
        pull_cooldown: CooldownOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        ..Default::default()
    };

    let err = assert_err!(Orchestrator::new(engine.clone(), settings).deploy(&web("app:v1")).await);

    assert!(matches!(err, DeployerError::RegistryError(_)));
    assert_eq!(ops(&engine.calls()), vec![EngineOp::Pull; 3]);
}

#[tokio::test]
async fn test_stop_failure_aborts_before_create() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    engine.fail_on(EngineOp::Stop);

    let err = assert_err!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert!(matches!(
        err,
        DeployerError::EngineError {
            step: EngineStep::StopPrevious,
            ..
        }
    ));
    assert_eq!(ops(&engine.mutations()), vec![EngineOp::Stop]);
    assert_eq!(engine.containers()[0].state, "running");
}

#[tokio::test]
async fn test_locate_failure_touches_nothing() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    engine.fail_on(EngineOp::List);

    let err = assert_err!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert!(matches!(
        err,
        DeployerError::EngineError {
            step: EngineStep::LocatePrevious,
            ..
        }
    ));
    assert!(engine.mutations().is_empty());
    assert_eq!(engine.containers()[0].state, "running");
}

#[tokio::test]
async fn test_remove_failure_aborts_before_create() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    engine.fail_on(EngineOp::Remove);

    let err = assert_err!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert!(matches!(
        err,
        DeployerError::EngineError {
            step: EngineStep::RemovePrevious,
            ..
        }
    ));
    assert_eq!(ops(&engine.mutations()), vec![EngineOp::Stop, EngineOp::Remove]);
    let containers = engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "c1");
    assert_eq!(containers[0].state, "exited");
}

#[tokio::test]
async fn test_deadline_names_the_interrupted_step() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    engine.delay_on(EngineOp::Create, Duration::from_secs(5));
    let settings = DeploySettings {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };

    let err = assert_err!(Orchestrator::new(engine.clone(), settings).deploy(&web("app:v2")).await);

    assert!(matches!(
        err,
        DeployerError::Timeout {
            state: DeploymentState::CreatingNew,
            ..
        }
    ));
    assert!(err.to_string().contains("creating new container"));
    // the previous container was already removed when the deadline hit
    assert!(engine.containers().is_empty());
}

#[tokio::test]
async fn test_create_failure_leaves_no_container() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    engine.fail_on(EngineOp::Create);

    let err = assert_err!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert!(matches!(
        err,
        DeployerError::EngineError {
            step: EngineStep::CreateNew,
            ..
        }
    ));
    assert!(engine.containers().is_empty());
    assert!(!engine
        .mutations()
        .iter()
        .any(|call| call.op() == EngineOp::Start));
}

#[tokio::test]
async fn test_start_failure_keeps_created_container() {
    let engine = Arc::new(MemoryEngine::new());
    engine.fail_on(EngineOp::Start);

    let err = assert_err!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert!(matches!(
        err,
        DeployerError::EngineError {
            step: EngineStep::StartNew,
            ..
        }
    ));
    let containers = engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].state, "created");
}

#[tokio::test]
async fn test_stopped_previous_container_is_replaced() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "exited"));

    let deployed = assert_ok!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert_eq!(
        ops(&engine.mutations()),
        vec![
            EngineOp::Stop,
            EngineOp::Remove,
            EngineOp::Create,
            EngineOp::Start,
        ]
    );
    assert_eq!(deployed.replaced.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_only_exact_name_is_replaced() {
    let engine = Arc::new(
        MemoryEngine::new().with_container("c9", "web-worker", "worker:v1", "running"),
    );

    let deployed = assert_ok!(orchestrator(&engine).deploy(&web("app:v2")).await);

    assert_eq!(ops(&engine.mutations()), vec![EngineOp::Create, EngineOp::Start]);
    assert!(deployed.replaced.is_none());
    let names: HashSet<String> = engine.containers().into_iter().map(|c| c.name).collect();
    assert_eq!(
        names,
        HashSet::from(["web".to_string(), "web-worker".to_string()])
    );
}

#[tokio::test]
async fn test_invalid_request_makes_no_engine_calls() {
    let engine = Arc::new(MemoryEngine::new());
    let request = config(json!({"name": "", "image": "app:v1"}));

    let err = assert_err!(orchestrator(&engine).deploy(&request).await);

    assert!(matches!(err, DeployerError::ValidationError(_)));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_deploys_of_one_name_leave_one_container() {
    let engine = Arc::new(MemoryEngine::new().with_container("c1", "web", "app:v1", "running"));
    let orchestrator = orchestrator(&engine);
    let first = web("app:v2");
    let second = web("app:v3");

    let (a, b) = tokio::join!(orchestrator.deploy(&first), orchestrator.deploy(&second));
    assert_ok!(a);
    assert_ok!(b);

    let containers = engine.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "web");
    assert_eq!(containers[0].state, "running");
}
