// Integration tests for the management API router: public vs protected
// routing, and the auth middleware's bearer-token gate.
// Run with: cargo test --test integration_management_api

use std::sync::Arc;

use agentctl::api::{self, ApiState};
use agentctl::auth::AuthState;
use agentctl::bus::EventBus;
use agentctl::config::ControllerConfig;
use agentctl::ports::PortAllocator;
use agentctl::provision::Provisioner;
use agentctl::storage::ChecksumIndex;
use agentctl::supervisor::Supervisor;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

fn build_state(auth_credential: &str) -> (ApiState, AuthState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = ControllerConfig::default();
    config.agents_directory = dir.path().to_path_buf();
    config.auth_credential = auth_credential.to_string();
    let config = Arc::new(config);

    let bus = EventBus::new();
    let ports = Arc::new(PortAllocator::new(config.base_port, config.max_agents));
    let index = Arc::new(ChecksumIndex::load(&dir.path().join("index.json")).expect("index"));
    let provisioner = Arc::new(Provisioner::new(config.agents_directory.clone()));
    let supervisor = Arc::new(Supervisor::new(ports, bus.clone(), dir.path().join("agentctl-agent")));

    let api_state = ApiState::new(config.clone(), index, provisioner, supervisor, bus.clone());
    let credential = if config.auth_credential.is_empty() { None } else { Some(config.auth_credential.clone()) };
    let auth_state = AuthState { credential, bus };
    (api_state, auth_state)
}

#[tokio::test]
async fn health_is_reachable_without_a_credential() {
    let (state, auth) = build_state("topsecret");
    let app = api::router(state, auth);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_route_rejects_missing_credential() {
    let (state, auth) = build_state("topsecret");
    let app = api::router(state, auth);

    let response = app
        .oneshot(Request::builder().uri("/agents").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_accepts_the_configured_bearer_token() {
    let (state, auth) = build_state("topsecret");
    let app = api::router(state, auth);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/agents")
                .header("Authorization", "Bearer topsecret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_route_is_open_when_no_credential_is_configured() {
    let (state, auth) = build_state("");
    let app = api::router(state, auth);

    let response = app
        .oneshot(Request::builder().uri("/agents").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
