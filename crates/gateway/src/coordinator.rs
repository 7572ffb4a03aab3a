// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-session coordination primitives: waitFor / waitAny / waitAll /
//! fanOut / race, built on the registry's broadcast event stream — the
//! same subscription primitive `Aggregator` (`state.rs`'s analogue) is used
//! directly rather than re-polling.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::driver::{FrameId, UIDriver};
use crate::events::GatewayEvent;
use crate::model::{epoch_ms, AgentResponse, AgentState};
use crate::queue::{Job, QueueRouter};
use crate::registry::SessionRegistry;
use crate::response_extractor::ResponseExtractor;

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub session_id: String,
    pub state: AgentState,
    pub response: Option<AgentResponse>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub enum CoordinatorError {
    Timeout { completed: Vec<String>, pending: Vec<String> },
    NoSessions,
}

pub struct WaitOptions {
    pub timeout: Duration,
    pub extract_response: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(300), extract_response: false }
    }
}

pub struct MultiSessionCoordinator {
    registry: Arc<SessionRegistry>,
    queue: Arc<QueueRouter>,
    driver: Arc<dyn UIDriver>,
}

impl MultiSessionCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, queue: Arc<QueueRouter>, driver: Arc<dyn UIDriver>) -> Self {
        Self { registry, queue, driver }
    }

    async fn maybe_extract(&self, session_id: &str, extract: bool) -> Option<AgentResponse> {
        if !extract {
            return None;
        }
        let handle = self.registry.get(session_id).await?;
        let extractor = ResponseExtractor::new(self.driver.clone());
        extractor.extract(&FrameId(handle.frame_locator)).await.ok()
    }

    /// Resolve immediately if `id` is already idle; otherwise subscribe and
    /// wait for its `session_idle` event.
    pub async fn wait_for(&self, id: &str, options: &WaitOptions) -> Result<CompletionResult, CoordinatorError> {
        let start = epoch_ms();
        if let Some(handle) = self.registry.get(id).await {
            if handle.state == AgentState::Idle {
                let response = self.maybe_extract(id, options.extract_response).await;
                return Ok(CompletionResult {
                    session_id: id.to_owned(),
                    state: AgentState::Idle,
                    response,
                    duration_ms: epoch_ms() - start,
                });
            }
        }

        let mut rx = self.registry.events.subscribe();
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(GatewayEvent::SessionIdle { session_id, .. }) if session_id == id => return Ok(()),
                    Ok(GatewayEvent::SessionClosed { session_id, .. }) if session_id == id => {
                        return Err(());
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(()),
                }
            }
        };

        match tokio::time::timeout(options.timeout, wait).await {
            Ok(Ok(())) => {
                let response = self.maybe_extract(id, options.extract_response).await;
                Ok(CompletionResult {
                    session_id: id.to_owned(),
                    state: AgentState::Idle,
                    response,
                    duration_ms: epoch_ms() - start,
                })
            }
            _ => Err(CoordinatorError::Timeout { completed: Vec::new(), pending: vec![id.to_owned()] }),
        }
    }

    /// Resolve with the first session already idle, or the first
    /// `session_idle` event to arrive.
    pub async fn wait_any(&self, options: &WaitOptions) -> Result<CompletionResult, CoordinatorError> {
        let start = epoch_ms();
        let idle = self.registry.get_by_state(AgentState::Idle).await;
        if let Some(handle) = idle.into_iter().next() {
            let response = self.maybe_extract(&handle.id, options.extract_response).await;
            return Ok(CompletionResult {
                session_id: handle.id,
                state: AgentState::Idle,
                response,
                duration_ms: epoch_ms() - start,
            });
        }

        if self.registry.size().await == 0 {
            return Err(CoordinatorError::NoSessions);
        }

        let mut rx = self.registry.events.subscribe();
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(GatewayEvent::SessionIdle { session_id, .. }) => return Some(session_id),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(options.timeout, wait).await {
            Ok(Some(session_id)) => {
                let response = self.maybe_extract(&session_id, options.extract_response).await;
                Ok(CompletionResult { session_id, state: AgentState::Idle, response, duration_ms: epoch_ms() - start })
            }
            _ => Err(CoordinatorError::Timeout { completed: Vec::new(), pending: Vec::new() }),
        }
    }

    /// Wait for every id in `ids` to report idle (or already-idle), within
    /// `options.timeout`. On timeout, rejects with a partial report.
    pub async fn wait_all(
        &self,
        ids: &[String],
        options: &WaitOptions,
    ) -> Result<Vec<CompletionResult>, CoordinatorError> {
        let start = epoch_ms();
        let mut pending: HashSet<String> = ids.iter().cloned().collect();
        let mut completed = Vec::new();

        for id in ids {
            if let Some(handle) = self.registry.get(id).await {
                if handle.state == AgentState::Idle {
                    pending.remove(id);
                    let response = self.maybe_extract(id, options.extract_response).await;
                    completed.push(CompletionResult {
                        session_id: id.clone(),
                        state: AgentState::Idle,
                        response,
                        duration_ms: epoch_ms() - start,
                    });
                }
            }
        }

        if pending.is_empty() {
            return Ok(completed);
        }

        let mut rx = self.registry.events.subscribe();
        let wait = async {
            while !pending.is_empty() {
                match rx.recv().await {
                    Ok(GatewayEvent::SessionIdle { session_id, .. }) if pending.remove(&session_id) => {
                        let response = self.maybe_extract(&session_id, options.extract_response).await;
                        completed.push(CompletionResult {
                            session_id,
                            state: AgentState::Idle,
                            response,
                            duration_ms: epoch_ms() - start,
                        });
                    }
                    Ok(GatewayEvent::SessionClosed { session_id, .. }) => {
                        pending.remove(&session_id);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        match tokio::time::timeout(options.timeout, wait).await {
            Ok(()) if pending.is_empty() => Ok(completed),
            _ => Err(CoordinatorError::Timeout {
                completed: completed.iter().map(|c| c.session_id.clone()).collect(),
                pending: pending.into_iter().collect(),
            }),
        }
    }

    /// Enqueue `prompt` on every currently-tracked session, then `waitAll`.
    pub async fn fan_out(&self, prompt: &str, options: &WaitOptions) -> Result<Vec<CompletionResult>, CoordinatorError> {
        let ids = self.enqueue_on_all(prompt).await?;
        self.wait_all(&ids, options).await
    }

    /// Enqueue `prompt` on every currently-tracked session, then `waitAny`.
    /// Losing sessions' responses are not returned, but still run to
    /// completion independently.
    pub async fn race(&self, prompt: &str, options: &WaitOptions) -> Result<CompletionResult, CoordinatorError> {
        self.enqueue_on_all(prompt).await?;
        self.wait_any(options).await
    }

    async fn enqueue_on_all(&self, prompt: &str) -> Result<Vec<String>, CoordinatorError> {
        let sessions = self.registry.list().await;
        if sessions.is_empty() {
            return Err(CoordinatorError::NoSessions);
        }
        let mut ids = Vec::with_capacity(sessions.len());
        let mut pending_jobs = FuturesUnordered::new();
        for session in sessions {
            ids.push(session.id.clone());
            let mut request = crate::orchestrator::ChatCompletionRequest::simple(prompt);
            request.session = Some(session.id.clone());
            let (_rx, job) = Job::fire_and_forget(request);
            let queue = Arc::clone(&self.queue);
            pending_jobs.push(async move { queue.submit(job).await });
        }
        while pending_jobs.next().await.is_some() {}
        Ok(ids)
    }
}
