// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + SSE transport for the OpenAI-compatible gateway.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::GatewayState;

/// Build the axum `Router` with all gateway routes. `CorsLayer::permissive`
/// answers preflight `OPTIONS` requests itself, ahead of the auth layer.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/v1/models", get(http::list_models))
        .route("/v1/models/{id}", get(http::get_model))
        .route("/v1/sessions", get(http::list_sessions))
        .route("/v1/sessions/stream", get(http::sessions_stream))
        .route("/v1/sessions/{id}/events", get(http::session_events))
        .route("/v1/sessions/{id}/close", post(http::close_session))
        .route("/v1/availability", get(http::availability))
        .route("/v1/chat/completions", post(http::chat_completions))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
