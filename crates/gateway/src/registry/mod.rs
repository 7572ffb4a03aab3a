// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discovers, tracks, and polls chat sessions. Single-writer discipline:
//! all mutation to the session map happens on the poll callback or on
//! explicit `discover()`; subscribers observing the map via events see
//! updated state before the event fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::driver::{FrameId, UIDriver};
use crate::events::{Aggregator, GatewayEvent};
use crate::frame_locator::FrameLocator;
use crate::model::{epoch_ms, AgentState, SessionHandle};
use crate::response_extractor::ResponseExtractor;
use crate::state_probe::{is_fatal_probe_error, StateProbe};

/// Sessions whose page URL marks them as a main workbench, not an
/// agent-manager shell window.
fn is_workbench_page(url: &str) -> bool {
    (url.contains("workbench") || url.contains("project")) && !url.contains("agent-manager")
}

/// Prefer a URL-extracted session id (the trailing path or query-string
/// segment that identifies a workspace/conversation); fall back to a
/// monotonic counter plus random suffix.
fn extract_id_from_url(url: &str) -> Option<String> {
    let after_query = url.split('?').nth(1)?;
    after_query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "sessionId" || key == "session" || key == "workspaceId").then(|| value.to_owned())
    })
}

fn synthesize_id(counter: &AtomicU64) -> String {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    let suffix: u32 = rand::random();
    format!("session-{n}-{suffix:08x}")
}

pub struct SessionRegistry {
    driver: Arc<dyn UIDriver>,
    frame_locator: FrameLocator,
    probe: StateProbe,
    extractor: ResponseExtractor,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    probe_failures: RwLock<HashMap<String, u32>>,
    max_probe_failures: u32,
    id_counter: AtomicU64,
    pub events: Aggregator,
    polling: std::sync::Mutex<Option<JoinHandle<()>>>,
    polling_started: AtomicBool,
}

impl SessionRegistry {
    pub fn new(driver: Arc<dyn UIDriver>, max_probe_failures: u32) -> Self {
        Self {
            frame_locator: FrameLocator::new(driver.clone()),
            probe: StateProbe::new(driver.clone()),
            extractor: ResponseExtractor::new(driver.clone()),
            driver,
            sessions: RwLock::new(HashMap::new()),
            probe_failures: RwLock::new(HashMap::new()),
            max_probe_failures,
            id_counter: AtomicU64::new(0),
            events: Aggregator::new(),
            polling: std::sync::Mutex::new(None),
            polling_started: AtomicBool::new(false),
        }
    }

    /// Enumerate pages, filter to qualifying workbench pages, resolve the
    /// agent frame for each, sample state, and register any new session.
    /// Returns the ids newly discovered this call.
    pub async fn discover(&self) -> Vec<String> {
        let mut discovered = Vec::new();
        let Ok(pages) = self.driver.pages().await else { return discovered };

        for page in pages {
            let Ok(url) = self.driver.page_url(&page).await else { continue };
            if !is_workbench_page(&url) {
                continue;
            }
            let Ok(frame) = self.frame_locator.locate(&page).await else { continue };
            let Ok(sample) = self.probe.sample(&frame).await else { continue };
            let Ok(title) = self.driver.page_title(&page).await else { continue };

            let id = extract_id_from_url(&url).unwrap_or_else(|| synthesize_id(&self.id_counter));

            let is_new = {
                let sessions = self.sessions.read().await;
                !sessions.contains_key(&id)
            };
            if !is_new {
                continue;
            }

            let handle = SessionHandle {
                id: id.clone(),
                page_locator: page.0.clone(),
                frame_locator: frame.0.clone(),
                state: sample.state,
                last_activity_epoch_ms: epoch_ms(),
                title,
                workspace: None,
            };
            self.sessions.write().await.insert(id.clone(), handle);
            self.events
                .publish(GatewayEvent::Discovered { session_id: id.clone(), state: sample.state, timestamp: epoch_ms() })
                .await;
            discovered.push(id);
        }

        discovered
    }

    /// Start the background poll loop, idempotently — a second call while
    /// polling is already running is a no-op.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) {
        if self.polling_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move { registry.poll_loop(interval).await });
        if let Ok(mut guard) = self.polling.lock() {
            *guard = Some(handle);
        }
    }

    /// Stop the background poll loop. Idempotent.
    pub fn stop_polling(&self) {
        if !self.polling_started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.polling.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    async fn poll_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !self.polling_started.load(Ordering::SeqCst) {
                break;
            }
            self.poll_once().await;
        }
    }

    /// Run a single poll pass over all tracked sessions. Exposed separately
    /// from `poll_loop` so tests can drive polling deterministically.
    pub async fn poll_once(&self) {
        let ids: Vec<String> = { self.sessions.read().await.keys().cloned().collect() };

        for id in ids {
            let Some((frame_locator, previous_state)) = ({
                let sessions = self.sessions.read().await;
                sessions.get(&id).map(|h| (h.frame_locator.clone(), h.state))
            }) else {
                continue;
            };
            let frame = FrameId(frame_locator);

            match self.probe.sample(&frame).await {
                Ok(sample) => {
                    self.probe_failures.write().await.remove(&id);
                    if sample.state != previous_state {
                        if let Some(handle) = self.sessions.write().await.get_mut(&id) {
                            handle.state = sample.state;
                            handle.last_activity_epoch_ms = epoch_ms();
                        }
                        self.events
                            .publish(GatewayEvent::StateChange {
                                session_id: id.clone(),
                                previous: previous_state,
                                current: sample.state,
                                timestamp: epoch_ms(),
                            })
                            .await;
                        if sample.state == AgentState::Idle {
                            self.events
                                .publish(GatewayEvent::SessionIdle { session_id: id.clone(), timestamp: epoch_ms() })
                                .await;
                            if let Ok(response) = self.extractor.extract(&frame).await {
                                self.events
                                    .publish(GatewayEvent::ResponseReady {
                                        session_id: id.clone(),
                                        response,
                                        timestamp: epoch_ms(),
                                    })
                                    .await;
                            }
                        }
                    }
                }
                Err(err) => {
                    let mut failures = self.probe_failures.write().await;
                    let count = failures.entry(id.clone()).or_insert(0);
                    *count += 1;
                    let fatal = is_fatal_probe_error(&err) || *count >= self.max_probe_failures;
                    if fatal {
                        failures.remove(&id);
                        drop(failures);
                        self.sessions.write().await.remove(&id);
                        self.events
                            .publish(GatewayEvent::SessionClosed { session_id: id.clone(), timestamp: epoch_ms() })
                            .await;
                    }
                }
            }
        }
    }

    pub async fn list(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn get_by_state(&self, state: AgentState) -> Vec<SessionHandle> {
        self.sessions.read().await.values().filter(|h| h.state == state).cloned().collect()
    }

    pub async fn size(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Resolve a session id (exact or prefix match by id or title).
    pub async fn resolve(&self, needle: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        if let Some(handle) = sessions.get(needle) {
            return Some(handle.clone());
        }
        sessions
            .values()
            .find(|h| h.id.starts_with(needle) || h.title.starts_with(needle))
            .cloned()
    }

    /// Explicitly remove a tracked session, as if its probe had failed
    /// fatally. Emits `session_closed`. Returns whether a session was
    /// actually present.
    pub async fn close(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            self.probe_failures.write().await.remove(id);
            self.events.publish(GatewayEvent::SessionClosed { session_id: id.to_owned(), timestamp: epoch_ms() }).await;
        }
        removed
    }
}
