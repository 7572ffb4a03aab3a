// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + SSE handlers for the OpenAI-compatible surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::GatewayError;
use crate::events::{EventEnvelope, GatewayEvent};
use crate::model::AgentState;
use crate::orchestrator::{ChatCompletionRequest, DEFAULT_MODEL};
use crate::queue::Job;
use crate::GatewayState;

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub total_depth: usize,
    pub max_total_depth: usize,
    pub max_per_session: usize,
    pub busy_sessions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected: bool,
    pub sessions: usize,
    pub queue: QueueHealth,
}

/// `GET /health` — never requires auth.
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let connected = state.driver.pages().await.is_ok();
    Json(HealthResponse {
        status: "ok",
        connected,
        sessions: state.registry.size().await,
        queue: QueueHealth {
            total_depth: state.queue.total_depth().await,
            max_total_depth: state.queue.max_total(),
            max_per_session: state.queue.max_per_session(),
            busy_sessions: state.queue.busy_sessions().await,
        },
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
    pub created: u64,
}

#[derive(Debug, Serialize)]
pub struct ListEnvelope<T> {
    pub object: &'static str,
    pub data: Vec<T>,
}

fn stand_in_model() -> ModelInfo {
    ModelInfo { id: DEFAULT_MODEL.to_owned(), object: "model", owned_by: "angrav", created: 0 }
}

/// `GET /v1/models`.
pub async fn list_models() -> impl IntoResponse {
    Json(ListEnvelope { object: "list", data: vec![stand_in_model()] })
}

/// `GET /v1/models/{id}`.
pub async fn get_model(Path(id): Path<String>) -> Response {
    let model = stand_in_model();
    if model.id == id {
        Json(model).into_response()
    } else {
        GatewayError::UnknownModel(format!("unknown model: {id}")).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub state: AgentState,
    pub created: u64,
}

/// `GET /v1/sessions`.
pub async fn list_sessions(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let data = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|h| SessionSummary { id: h.id, name: h.title, state: h.state, created: h.last_activity_epoch_ms })
        .collect();
    Json(ListEnvelope { object: "list", data })
}

/// `POST /v1/sessions/{id}/close`.
pub async fn close_session(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> Response {
    if state.registry.close(&id).await {
        Json(serde_json::json!({"closed": true})).into_response()
    } else {
        GatewayError::NotFound(format!("unknown session: {id}")).into_response()
    }
}

/// `GET /v1/availability`.
pub async fn availability(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.availability.list_all_current().await)
}

fn sse_event(event: &GatewayEvent) -> Event {
    Event::default().json_data(EventEnvelope::from(event)).unwrap_or_else(|_| Event::default())
}

/// Drive one SSE subscriber: send the snapshot, then forward live events
/// matching `wants`, then break on `None` (lagged broadcasts are skipped,
/// never surfaced to the client). Mirrors the aggregated-websocket loop's
/// backfill-then-forward shape, with a heartbeat comment on the idle tick.
async fn pump_events(
    state: Arc<GatewayState>,
    tx: mpsc::UnboundedSender<Result<Event, Infallible>>,
    snapshot: Vec<GatewayEvent>,
    wants: impl Fn(&GatewayEvent) -> bool + Send + 'static,
    stop_on: impl Fn(&GatewayEvent) -> bool + Send + 'static,
) {
    for event in &snapshot {
        if tx.send(Ok(sse_event(event))).is_err() {
            return;
        }
    }

    let mut rx = state.registry.events.subscribe();
    let mut ticker = tokio::time::interval(state.config.sse_heartbeat_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                if !wants(&event) {
                    continue;
                }
                let done = stop_on(&event);
                if tx.send(Ok(sse_event(&event))).is_err() {
                    return;
                }
                if done {
                    return;
                }
            }
            _ = ticker.tick() => {
                if tx.send(Ok(Event::default().comment("heartbeat"))).is_err() {
                    return;
                }
            }
        }
    }
}

/// `GET /v1/sessions/stream` — all-session event feed, initial snapshot
/// then live events, heartbeats on the configured interval.
pub async fn sessions_stream(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let snapshot = state.registry.events.initial_snapshot().await;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_events(state, tx, snapshot, |_| true, |_| false));
    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// `GET /v1/sessions/{id}/events` — per-session event feed, auto-terminates
/// on `session_closed` for this id.
pub async fn session_events(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> impl IntoResponse {
    let snapshot: Vec<GatewayEvent> =
        state.registry.events.initial_snapshot().await.into_iter().filter(|e| e.session_id() == id).collect();
    let (tx, rx) = mpsc::unbounded_channel();
    let wants_id = id.clone();
    let stop_id = id;
    tokio::spawn(pump_events(
        state,
        tx,
        snapshot,
        move |e| e.session_id() == wants_id,
        move |e| e.session_id() == stop_id && matches!(e, GatewayEvent::SessionClosed { .. }),
    ));
    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if let Err(err) = request.validate() {
        return err.into_response();
    }

    if request.stream {
        let (chunk_rx, _done_rx, job) = Job::stream(request);
        if let Err(err) = state.queue.submit(job).await {
            return err.into_response();
        }
        let stream =
            UnboundedReceiverStream::new(chunk_rx).map(|chunk| Ok::<Event, Infallible>(Event::default().data(chunk)));
        Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        let (rx, job) = Job::respond(request);
        if let Err(err) = state.queue.submit(job).await {
            return err.into_response();
        }
        match rx.await {
            Ok(Ok(response)) => Json(response).into_response(),
            Ok(Err(err)) => err.into_response(),
            Err(_) => GatewayError::Internal("completion worker dropped the response channel".to_owned())
                .into_response(),
        }
    }
}
