// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session FIFO request queues with a single in-flight item per
//! session, using a double-checked-lock discipline to keep exactly one
//! completion in flight per session at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::error::GatewayError;
use crate::events::GatewayEvent;
use crate::orchestrator::{ChatCompletionRequest, ChatCompletionResponse, CompletionOrchestrator};
use crate::registry::SessionRegistry;

pub const DEFAULT_MAX_PER_SESSION: usize = 5;
pub const DEFAULT_MAX_TOTAL: usize = 20;
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(120);

/// One unit of dispatchable work, carrying its own response channel so the
/// queue never needs to know the shape of a caller's response path.
pub enum Job {
    Respond {
        request: ChatCompletionRequest,
        respond: oneshot::Sender<Result<ChatCompletionResponse, GatewayError>>,
    },
    Stream {
        request: ChatCompletionRequest,
        chunks: mpsc::UnboundedSender<String>,
        done: oneshot::Sender<Result<(), GatewayError>>,
    },
}

impl Job {
    pub fn respond(request: ChatCompletionRequest) -> (oneshot::Receiver<Result<ChatCompletionResponse, GatewayError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (rx, Self::Respond { request, respond: tx })
    }

    /// Alias for `respond`, used where the caller discards the receiver.
    pub fn fire_and_forget(request: ChatCompletionRequest) -> (oneshot::Receiver<Result<ChatCompletionResponse, GatewayError>>, Self) {
        Self::respond(request)
    }

    pub fn stream(
        request: ChatCompletionRequest,
    ) -> (mpsc::UnboundedReceiver<String>, oneshot::Receiver<Result<(), GatewayError>>, Self) {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        (chunk_rx, done_rx, Self::Stream { request, chunks: chunk_tx, done: done_tx })
    }

    fn session_hint(&self) -> Option<&str> {
        match self {
            Self::Respond { request, .. } | Self::Stream { request, .. } => request.session.as_deref(),
        }
    }

    fn fail(self, err: GatewayError) {
        match self {
            Self::Respond { respond, .. } => {
                let _ = respond.send(Err(err));
            }
            Self::Stream { done, .. } => {
                let _ = done.send(Err(err));
            }
        }
    }
}

struct QueueItem {
    job: Job,
    enqueued_at: Instant,
}

#[derive(Default)]
struct SessionQueue {
    processing: bool,
    fifo: VecDeque<QueueItem>,
}

pub struct QueueRouter {
    registry: Arc<SessionRegistry>,
    orchestrator: Arc<CompletionOrchestrator>,
    queues: RwLock<HashMap<String, SessionQueue>>,
    max_per_session: usize,
    max_total: usize,
    enqueue_timeout: Duration,
}

impl QueueRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        orchestrator: Arc<CompletionOrchestrator>,
        max_per_session: usize,
        max_total: usize,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            queues: RwLock::new(HashMap::new()),
            max_per_session,
            max_total,
            enqueue_timeout,
        }
    }

    /// Subscribe to the registry's event feed and purge a session's queue
    /// entry the moment it closes, so `queues` never accumulates an entry
    /// for a session nobody can submit to again. Idempotent to call more
    /// than once would just spawn a second redundant listener, so callers
    /// should call this once right after construction.
    pub fn spawn_eviction_listener(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let mut rx = router.registry.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(GatewayEvent::SessionClosed { session_id, .. }) => {
                        router.queues.write().await.remove(&session_id);
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    /// Resolve a target session (exact/prefix id or title match, else first
    /// idle, else first any), enforce queue bounds, and enqueue. Triggers
    /// `drain` for the resolved session on success.
    pub async fn submit(self: &Arc<Self>, job: Job) -> Result<(), GatewayError> {
        let session_id = self.resolve_target(job.session_hint()).await.ok_or(GatewayError::NoSession)?;

        let mut queues = self.queues.write().await;
        let total_depth: usize = queues.values().map(|q| q.fifo.len()).sum();
        let session_depth = queues.get(&session_id).map(|q| q.fifo.len()).unwrap_or(0);

        if session_depth >= self.max_per_session {
            drop(queues);
            job.fail(GatewayError::QueueFullSession);
            return Err(GatewayError::QueueFullSession);
        }
        if total_depth >= self.max_total {
            drop(queues);
            job.fail(GatewayError::QueueFullGlobal);
            return Err(GatewayError::QueueFullGlobal);
        }

        queues.entry(session_id.clone()).or_default().fifo.push_back(QueueItem { job, enqueued_at: Instant::now() });
        drop(queues);

        let router = Arc::clone(self);
        tokio::spawn(async move { router.drain(session_id).await });
        Ok(())
    }

    async fn resolve_target(&self, hint: Option<&str>) -> Option<String> {
        if let Some(hint) = hint {
            if let Some(handle) = self.registry.resolve(hint).await {
                return Some(handle.id);
            }
            return None;
        }
        if let Some(handle) = self.registry.get_by_state(crate::model::AgentState::Idle).await.into_iter().next() {
            return Some(handle.id);
        }
        self.registry.list().await.into_iter().next().map(|h| h.id)
    }

    /// Pop and process items for `session_id` one at a time until the fifo
    /// drains or another drain task is already holding the processing slot.
    async fn drain(&self, session_id: String) {
        loop {
            let item = {
                let mut queues = self.queues.write().await;
                let Some(queue) = queues.get_mut(&session_id) else { return };
                if queue.processing {
                    return;
                }
                let popped = queue.fifo.pop_front();
                if popped.is_some() {
                    queue.processing = true;
                }
                popped
            };
            let Some(item) = item else { return };

            if item.enqueued_at.elapsed() > self.enqueue_timeout {
                item.job.fail(GatewayError::Timeout("enqueue timeout exceeded".to_owned()));
                self.release(&session_id).await;
                continue;
            }

            match self.registry.get(&session_id).await {
                Some(handle) => self.orchestrator.process(&handle, item.job).await,
                None => item.job.fail(GatewayError::NoSession),
            }
            self.release(&session_id).await;
        }
    }

    async fn release(&self, session_id: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(session_id) {
            queue.processing = false;
        }
    }

    pub async fn total_depth(&self) -> usize {
        self.queues.read().await.values().map(|q| q.fifo.len()).sum()
    }

    pub async fn busy_sessions(&self) -> Vec<String> {
        self.queues
            .read()
            .await
            .iter()
            .filter(|(_, q)| q.processing)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn max_per_session(&self) -> usize {
        self.max_per_session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::driver::Capability;

    async fn setup() -> (Arc<FakeDriver>, Arc<SessionRegistry>, Arc<QueueRouter>) {
        let fake = Arc::new(FakeDriver::new());
        let registry = Arc::new(SessionRegistry::new(fake.clone(), 3));
        let orchestrator =
            Arc::new(CompletionOrchestrator::new(fake.clone(), "test-model", Duration::from_secs(5)));
        let router = Arc::new(QueueRouter::new(
            registry.clone(),
            orchestrator,
            2,
            4,
            Duration::from_millis(50),
        ));
        (fake, registry, router)
    }

    async fn idle_session(fake: &Arc<FakeDriver>, registry: &Arc<SessionRegistry>, url: &str) -> String {
        let page = fake.add_page(url).await;
        let frame = fake.add_frame(&page, "https://workbench.example/agent-surface").await;
        fake.set_capability(&frame, Capability::PromptInput, "input").await;
        fake.set_visible("input", true).await;
        fake.set_capability(&frame, Capability::AnswerBlock, "answer").await;
        fake.set_text("answer", "done").await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        fake.arm_auto_thinking("input", "stop", Duration::from_millis(5)).await;
        registry.discover().await.into_iter().next().expect("discovered")
    }

    #[tokio::test]
    async fn submit_dispatches_and_resolves() {
        let (fake, registry, router) = setup().await;
        idle_session(&fake, &registry, "https://workbench.example/project-a?sessionId=abc").await;

        let (rx, job) = Job::respond(ChatCompletionRequest::simple("hi"));
        router.submit(job).await.expect("submit");

        let result = rx.await.expect("oneshot").expect("completion");
        assert_eq!(result.choices[0].message.content, "done");
    }

    #[tokio::test]
    async fn fifo_order_preserved_for_same_session() {
        let (fake, registry, router) = setup().await;
        idle_session(&fake, &registry, "https://workbench.example/project-a?sessionId=abc").await;

        let (rx1, job1) = Job::respond(ChatCompletionRequest::simple("one"));
        let (rx2, job2) = Job::respond(ChatCompletionRequest::simple("two"));
        router.submit(job1).await.expect("submit 1");
        router.submit(job2).await.expect("submit 2");

        let r1 = rx1.await.expect("oneshot 1").expect("completion 1");
        let r2 = rx2.await.expect("oneshot 2").expect("completion 2");
        assert!(r1.created <= r2.created);
    }

    #[tokio::test]
    async fn rejects_no_session_when_registry_empty() {
        let (_fake, _registry, router) = setup().await;
        let (rx, job) = Job::respond(ChatCompletionRequest::simple("hi"));
        let err = router.submit(job).await.expect_err("no session");
        assert_eq!(err, GatewayError::NoSession);
        assert_eq!(rx.await.expect("oneshot").expect_err("rejected"), GatewayError::NoSession);
    }

    #[tokio::test]
    async fn rejects_queue_full_session() {
        let (fake, registry, router) = setup().await;
        let id = idle_session(&fake, &registry, "https://workbench.example/project-a?sessionId=abc").await;

        for _ in 0..2 {
            let mut req = ChatCompletionRequest::simple("x");
            req.session = Some(id.clone());
            let (_rx, job) = Job::respond(req);
            let mut queues = router.queues.write().await;
            let queue = queues.entry(id.clone()).or_default();
            queue.processing = true;
            queue.fifo.push_back(QueueItem { job, enqueued_at: Instant::now() });
        }

        let mut req = ChatCompletionRequest::simple("y");
        req.session = Some(id.clone());
        let (_rx, job) = Job::respond(req);
        let err = router.submit(job).await.expect_err("session full");
        assert_eq!(err, GatewayError::QueueFullSession);
    }

    #[tokio::test]
    async fn session_closed_purges_its_queue_entry() {
        let (fake, registry, router) = setup().await;
        let id = idle_session(&fake, &registry, "https://workbench.example/project-a?sessionId=abc").await;
        router.spawn_eviction_listener();

        {
            let mut queues = router.queues.write().await;
            queues.entry(id.clone()).or_default();
        }
        assert!(router.queues.read().await.contains_key(&id));

        registry.close(&id).await;
        for _ in 0..50 {
            if !router.queues.read().await.contains_key(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!router.queues.read().await.contains_key(&id), "queue entry purged after session_closed");
    }
}
