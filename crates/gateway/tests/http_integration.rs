// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end HTTP-layer coverage against `build_router`, backed by the
//! in-memory `FakeDriver` rather than a real remote-debugging connection.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use serde_json::json;

use gateway::config::GatewayConfig;
use gateway::coordinator::MultiSessionCoordinator;
use gateway::driver::fake::FakeDriver;
use gateway::driver::Capability;
use gateway::orchestrator::{CompletionOrchestrator, DEFAULT_MODEL};
use gateway::queue::QueueRouter;
use gateway::rate_limit::availability_store::AvailabilityStore;
use gateway::rate_limit::RateLimitDetector;
use gateway::registry::SessionRegistry;
use gateway::transport::build_router;
use gateway::GatewayState;

fn config(auth_token: Option<&str>) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        auth_token: auth_token.map(str::to_owned),
        remote_debug_url: "http://127.0.0.1:9222".to_owned(),
        availability_store_path: std::path::PathBuf::from("unused-in-tests.json"),
        state_poll_ms: 2000,
        stream_poll_ms: 50,
        stream_timeout_secs: 5,
        request_timeout_secs: 5,
        max_per_session: 5,
        max_total: 20,
        enqueue_timeout_secs: 5,
        sse_heartbeat_secs: 30,
        max_probe_failures: 3,
    }
}

async fn server_with(auth_token: Option<&str>) -> (TestServer, Arc<FakeDriver>) {
    let fake = Arc::new(FakeDriver::new());
    let driver: Arc<dyn gateway::driver::UIDriver> = fake.clone();

    let cfg = config(auth_token);
    let availability = Arc::new(AvailabilityStore::in_memory());
    let rate_limit = Arc::new(RateLimitDetector::new(driver.clone()));
    let registry = Arc::new(SessionRegistry::new(driver.clone(), cfg.max_probe_failures));
    let orchestrator =
        Arc::new(CompletionOrchestrator::new(driver.clone(), DEFAULT_MODEL, cfg.request_timeout()));
    let queue = Arc::new(QueueRouter::new(
        registry.clone(),
        orchestrator,
        cfg.max_per_session,
        cfg.max_total,
        cfg.enqueue_timeout(),
    ));
    let coordinator = Arc::new(MultiSessionCoordinator::new(registry.clone(), queue.clone(), driver.clone()));

    let state = Arc::new(GatewayState {
        config: cfg,
        driver,
        registry,
        queue,
        coordinator,
        availability,
        rate_limit,
        shutdown: tokio_util::sync::CancellationToken::new(),
    });

    let server = TestServer::new(build_router(state)).expect("test server");
    (server, fake)
}

async fn seed_idle_session(fake: &Arc<FakeDriver>, registry: &Arc<SessionRegistry>) -> String {
    let page = fake.add_page("https://workbench.example/project-a?sessionId=abc").await;
    let frame = fake.add_frame(&page, "https://workbench.example/agent-surface").await;
    fake.set_capability(&frame, Capability::PromptInput, "input").await;
    fake.set_visible("input", true).await;
    fake.set_capability(&frame, Capability::AnswerBlock, "answer").await;
    fake.set_text("answer", "hello from the fake session").await;
    fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
    fake.arm_auto_thinking("input", "stop", Duration::from_millis(5)).await;
    registry.discover().await.into_iter().next().expect("discovered session")
}

#[tokio::test]
async fn health_never_requires_auth() {
    let (server, _fake) = server_with(Some("secret")).await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn session_event_streams_never_require_auth() {
    let (server, _fake) = server_with(Some("secret")).await;
    let response = server.get("/v1/sessions/stream").await;
    response.assert_status_ok();
    let response = server.get("/v1/sessions/abc/events").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn protected_route_rejects_missing_bearer_token() {
    let (server, _fake) = server_with(Some("secret")).await;
    let response = server.get("/v1/models").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_accepts_matching_bearer_token() {
    let (server, _fake) = server_with(Some("secret")).await;
    let response = server.get("/v1/models").authorization_bearer("secret").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn list_models_returns_the_stand_in_model() {
    let (server, _fake) = server_with(None).await;
    let response = server.get("/v1/models").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], DEFAULT_MODEL);
}

#[tokio::test]
async fn get_unknown_model_returns_not_found() {
    let (server, _fake) = server_with(None).await;
    let response = server.get("/v1/models/not-a-real-model").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], 404);
}

#[tokio::test]
async fn chat_completions_rejects_empty_messages() {
    let (server, _fake) = server_with(None).await;
    let response = server.post("/v1/chat/completions").json(&json!({ "messages": [] })).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_completions_rejects_no_session_when_registry_empty() {
    let (server, _fake) = server_with(None).await;
    let response = server
        .post("/v1/chat/completions")
        .json(&json!({ "messages": [{"role": "user", "content": "hi"}] }))
        .await;
    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn chat_completions_happy_path_returns_openai_envelope() {
    let fake = Arc::new(FakeDriver::new());
    let driver: Arc<dyn gateway::driver::UIDriver> = fake.clone();
    let cfg = config(None);
    let availability = Arc::new(AvailabilityStore::in_memory());
    let rate_limit = Arc::new(RateLimitDetector::new(driver.clone()));
    let registry = Arc::new(SessionRegistry::new(driver.clone(), cfg.max_probe_failures));
    seed_idle_session(&fake, &registry).await;

    let orchestrator =
        Arc::new(CompletionOrchestrator::new(driver.clone(), DEFAULT_MODEL, cfg.request_timeout()));
    let queue = Arc::new(QueueRouter::new(
        registry.clone(),
        orchestrator,
        cfg.max_per_session,
        cfg.max_total,
        cfg.enqueue_timeout(),
    ));
    let coordinator = Arc::new(MultiSessionCoordinator::new(registry.clone(), queue.clone(), driver.clone()));
    let state = Arc::new(GatewayState {
        config: cfg,
        driver,
        registry,
        queue,
        coordinator,
        availability,
        rate_limit,
        shutdown: tokio_util::sync::CancellationToken::new(),
    });
    let server = TestServer::new(build_router(state)).expect("test server");

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({ "messages": [{"role": "user", "content": "hi there"}] }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "hello from the fake session");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
}

#[tokio::test]
async fn list_sessions_reflects_discovered_sessions() {
    let (server, fake) = server_with(None).await;
    let page = fake.add_page("https://workbench.example/project-a?sessionId=abc").await;
    fake.add_frame(&page, "https://workbench.example/agent-surface").await;

    let response = server.get("/v1/sessions").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["data"].as_array().unwrap().is_empty(), "sessions only appear after discover() runs");
}

#[tokio::test]
async fn close_unknown_session_returns_not_found() {
    let (server, _fake) = server_with(None).await;
    let response = server.post("/v1/sessions/nonexistent/close").await;
    response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn availability_starts_empty() {
    let (server, _fake) = server_with(None).await;
    let response = server.get("/v1/availability").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body.as_array().unwrap().is_empty());
}
