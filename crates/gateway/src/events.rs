// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed registry events and the broadcast hub that fans them out to SSE
//! subscribers (`/v1/sessions/stream`, `/v1/sessions/{id}/events`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::model::{epoch_ms, AgentResponse, AgentState};

/// Envelope events emitted by the `SessionRegistry` and consumed by
/// `MultiSessionCoordinator` and `EventStream` subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Discovered { session_id: String, state: AgentState, timestamp: u64 },
    StateChange { session_id: String, previous: AgentState, current: AgentState, timestamp: u64 },
    SessionIdle { session_id: String, timestamp: u64 },
    SessionClosed { session_id: String, timestamp: u64 },
    ResponseReady { session_id: String, response: AgentResponse, timestamp: u64 },
}

impl GatewayEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Discovered { session_id, .. }
            | Self::StateChange { session_id, .. }
            | Self::SessionIdle { session_id, .. }
            | Self::SessionClosed { session_id, .. }
            | Self::ResponseReady { session_id, .. } => session_id,
        }
    }

    pub fn current_state(&self) -> Option<AgentState> {
        match self {
            Self::Discovered { state, .. } => Some(*state),
            Self::StateChange { current, .. } => Some(*current),
            Self::SessionIdle { .. } => Some(AgentState::Idle),
            Self::SessionClosed { .. } | Self::ResponseReady { .. } => None,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Discovered { timestamp, .. }
            | Self::StateChange { timestamp, .. }
            | Self::SessionIdle { timestamp, .. }
            | Self::SessionClosed { timestamp, .. }
            | Self::ResponseReady { timestamp, .. } => *timestamp,
        }
    }
}

/// Cached per-session state used to build the SSE initial snapshot.
#[derive(Debug, Clone)]
pub struct SessionCache {
    pub state: AgentState,
}

/// Broadcast hub: one `broadcast::Sender<GatewayEvent>` plus a cache of the
/// last-known state per session, so new subscribers can be sent a synthetic
/// snapshot before live events.
pub struct Aggregator {
    tx: broadcast::Sender<GatewayEvent>,
    cache: Arc<RwLock<HashMap<String, SessionCache>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx, cache: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, updating the cache as a side effect so every
    /// emitted event matches the registry's tracked state at the moment of
    /// emission.
    pub async fn publish(&self, event: GatewayEvent) {
        if let Some(state) = event.current_state() {
            self.cache.write().await.insert(event.session_id().to_owned(), SessionCache { state });
        }
        if matches!(event, GatewayEvent::SessionClosed { .. }) {
            self.cache.write().await.remove(event.session_id());
        }
        let _ = self.tx.send(event);
    }

    /// Synthetic `state_change` snapshot, one per currently-cached session,
    /// to be sent to a subscriber before any live event.
    pub async fn initial_snapshot(&self) -> Vec<GatewayEvent> {
        let cache = self.cache.read().await;
        let now = epoch_ms();
        cache
            .iter()
            .map(|(id, entry)| GatewayEvent::StateChange {
                session_id: id.clone(),
                previous: entry.state,
                current: entry.state,
                timestamp: now,
            })
            .collect()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// SSE wire envelope for the session event streams.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AgentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<AgentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AgentResponse>,
    pub timestamp: u64,
}

impl From<&GatewayEvent> for EventEnvelope {
    fn from(event: &GatewayEvent) -> Self {
        let kind = match event {
            GatewayEvent::Discovered { .. } | GatewayEvent::StateChange { .. } => "state_change",
            GatewayEvent::SessionIdle { .. } => "session_idle",
            GatewayEvent::SessionClosed { .. } => "session_closed",
            GatewayEvent::ResponseReady { .. } => "response_ready",
        };
        let previous_state = match event {
            GatewayEvent::StateChange { previous, .. } => Some(*previous),
            _ => None,
        };
        let response = match event {
            GatewayEvent::ResponseReady { response, .. } => Some(response.clone()),
            _ => None,
        };
        Self {
            kind,
            session_id: event.session_id().to_owned(),
            state: event.current_state(),
            previous_state,
            response,
            timestamp: event.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initial_snapshot_reflects_cache_then_live_events_follow() {
        let agg = Aggregator::new();
        agg.publish(GatewayEvent::Discovered { session_id: "s1".to_owned(), state: AgentState::Idle, timestamp: 1 })
            .await;

        let snapshot = agg.initial_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].session_id(), "s1");

        let mut rx = agg.subscribe();
        agg.publish(GatewayEvent::StateChange {
            session_id: "s1".to_owned(),
            previous: AgentState::Idle,
            current: AgentState::Thinking,
            timestamp: 2,
        })
        .await;
        let live = rx.recv().await.expect("live event");
        assert_eq!(live.current_state(), Some(AgentState::Thinking));
    }

    #[tokio::test]
    async fn session_closed_removes_from_cache() {
        let agg = Aggregator::new();
        agg.publish(GatewayEvent::Discovered { session_id: "s1".to_owned(), state: AgentState::Idle, timestamp: 1 })
            .await;
        agg.publish(GatewayEvent::SessionClosed { session_id: "s1".to_owned(), timestamp: 2 }).await;

        assert!(agg.initial_snapshot().await.is_empty());
    }

    #[test]
    fn envelope_carries_previous_state_only_for_state_change() {
        let event = GatewayEvent::SessionIdle { session_id: "s1".to_owned(), timestamp: 1 };
        let envelope = EventEnvelope::from(&event);
        assert_eq!(envelope.kind, "session_idle");
        assert!(envelope.previous_state.is_none());
    }
}
