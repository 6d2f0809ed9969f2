//! HTTP surface tests, driving the router directly

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::Router;
use deploy_api::models::{ContainerSummary, DeployedContainer, ErrorResponse, HealthResponse};
use deployer::authn::gate::AuthGate;
use deployer::deploy::orchestrator::{DeploySettings, Orchestrator};
use deployer::engine::memory::{EngineCall, EngineOp, MemoryEngine};
use deployer::server::serve::router;
use deployer::server::state::ServerState;
use http::{Request, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

fn app(engine: &Arc<MemoryEngine>) -> Router {
    app_with(engine, DeploySettings::default())
}

fn app_with(engine: &Arc<MemoryEngine>, settings: DeploySettings) -> Router {
    let orchestrator = Arc::new(Orchestrator::new(engine.clone(), settings));
    let gate = Arc::new(AuthGate::new(SecretString::from(TOKEN.to_string())));
    router(Arc::new(ServerState::new(engine.clone(), orchestrator, gate)))
}

fn seeded() -> Arc<MemoryEngine> {
    Arc::new(
        MemoryEngine::new()
            .with_container("c1", "web", "app:v1", "running")
            .with_container("c2", "batch", "job:v1", "exited"),
    )
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", token);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/deploy/")
        .header("Authorization", TOKEN)
        .header("Content-Type", content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_list_running_containers() {
    let engine = seeded();

    let response = app(&engine).oneshot(get("/deploy/", Some(TOKEN))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let containers: Vec<ContainerSummary> = json_body(response).await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, "c1");
    assert_eq!(containers[0].name, "web");
}

#[tokio::test]
async fn test_list_all_containers() {
    let engine = seeded();

    let response = app(&engine)
        .oneshot(get("/deploy?all=true", Some(TOKEN)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let containers: Vec<ContainerSummary> = json_body(response).await;
    assert_eq!(containers.len(), 2);
}

#[tokio::test]
async fn test_wrong_token_is_rejected_before_engine() {
    let engine = seeded();

    let response = app(&engine).oneshot(get("/deploy/", Some("nope"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error, "unauthorized");
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let engine = seeded();

    let response = app(&engine).oneshot(get("/deploy/", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_list_failure_is_internal_error() {
    let engine = seeded();
    engine.fail_on(EngineOp::List);

    let response = app(&engine).oneshot(get("/deploy/", Some(TOKEN))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_deploy_json_replaces_container() {
    let engine = seeded();
    let body = r#"{
        "user": "u",
        "token": "t",
        "name": "web",
        "image": "app:v2",
        "network": "default",
        "env": {"MODE": "prod"},
        "volumes": [],
        "tty": false
    }"#;

    let response = app(&engine)
        .oneshot(post("application/json", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let deployed: DeployedContainer = json_body(response).await;
    assert_ne!(deployed.id, "c1");
    assert_eq!(deployed.image, "app:v2");
    assert_eq!(deployed.replaced.as_deref(), Some("c1"));

    let web: Vec<_> = engine
        .containers()
        .into_iter()
        .filter(|container| container.name == "web")
        .collect();
    assert_eq!(web.len(), 1);
    assert_eq!(web[0].id, deployed.id);
}

#[tokio::test]
async fn test_deploy_capitalised_fields() {
    let engine = Arc::new(MemoryEngine::new());
    let body = r#"{"Name": "web", "Image": "app:v2", "Env": {"A": "1"}, "Tty": true}"#;

    let response = app(&engine)
        .oneshot(post("application/json", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let spec = engine
        .calls()
        .into_iter()
        .find_map(|call| match call {
            EngineCall::Create(spec) => Some(spec),
            _ => None,
        })
        .unwrap();
    assert!(spec.tty);
    assert_eq!(spec.env, vec!["A=1".to_string()]);
}

#[tokio::test]
async fn test_deploy_form_payload() {
    let engine = Arc::new(MemoryEngine::new());

    let response = app(&engine)
        .oneshot(post(
            "application/x-www-form-urlencoded",
            "name=web&image=app%3Av2&user=u&token=t",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        engine.calls()[0],
        EngineCall::Pull {
            image: "app:v2".to_string(),
            username: Some("u".to_string()),
        }
    );
}

#[tokio::test]
async fn test_deploy_invalid_payload() {
    let engine = seeded();

    let response = app(&engine)
        .oneshot(post("application/json", r#"{"image": "app:v2"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error, "validation");
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_deploy_malformed_json() {
    let engine = seeded();

    let response = app(&engine)
        .oneshot(post("application/json", "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_deploy_pull_failure_is_bad_gateway() {
    let engine = seeded();
    engine.fail_on(EngineOp::Pull);

    let response = app(&engine)
        .oneshot(post("application/json", r#"{"name": "web", "image": "app:v2"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error, "registry");
    assert!(engine.mutations().is_empty());
}

#[tokio::test]
async fn test_deploy_deadline_is_gateway_timeout() {
    let engine = seeded();
    engine.delay_on(EngineOp::Start, Duration::from_secs(5));
    let settings = DeploySettings {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };

    let response = app_with(&engine, settings)
        .oneshot(post("application/json", r#"{"name": "web", "image": "app:v2"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error, "timeout");
    assert!(error.message.contains("starting new container"));
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let engine = seeded();

    let response = app(&engine).oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = json_body(response).await;
    assert_eq!(health.status, "healthy");
}
