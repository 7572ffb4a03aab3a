// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! antigravity-gateway: an OpenAI-compatible chat-completion HTTP surface
//! over a remote-debugging-driven desktop chat UI.

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod events;
pub mod frame_locator;
pub mod model;
pub mod orchestrator;
pub mod prompt_injector;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod response_extractor;
pub mod state_probe;
pub mod stream_poller;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::coordinator::MultiSessionCoordinator;
use crate::driver::UIDriver;
use crate::orchestrator::{CompletionOrchestrator, DEFAULT_MODEL};
use crate::queue::QueueRouter;
use crate::rate_limit::availability_store::AvailabilityStore;
use crate::rate_limit::RateLimitDetector;
use crate::registry::SessionRegistry;
use crate::transport::build_router;

/// Shared state handed to every handler.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub driver: Arc<dyn UIDriver>,
    pub registry: Arc<SessionRegistry>,
    pub queue: Arc<QueueRouter>,
    pub coordinator: Arc<MultiSessionCoordinator>,
    pub availability: Arc<AvailabilityStore>,
    pub rate_limit: Arc<RateLimitDetector>,
    pub shutdown: CancellationToken,
}

/// Wire up the registry, queue, orchestrator, and coordinator against an
/// injected `driver`, and run the server until `shutdown` fires or the
/// process receives ctrl-c.
///
/// This crate ships no concrete `UIDriver` — attaching to a real
/// remote-debugging endpoint is left to the embedder (see `driver::UIDriver`
/// doc comment). `main.rs` wires the in-memory `driver::fake::FakeDriver` so
/// the binary runs standalone; production deployments inject their own.
pub async fn run(config: GatewayConfig, driver: Arc<dyn UIDriver>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let availability = Arc::new(AvailabilityStore::load(&config.availability_store_path)?);
    let rate_limit = Arc::new(RateLimitDetector::new(driver.clone()));

    let registry = Arc::new(SessionRegistry::new(driver.clone(), config.max_probe_failures));
    registry.discover().await;
    registry.start_polling(config.state_poll_interval());

    let orchestrator = Arc::new(
        CompletionOrchestrator::with_stream_options(
            driver.clone(),
            DEFAULT_MODEL,
            config.request_timeout(),
            crate::stream_poller::StreamOptions {
                poll_interval: config.stream_poll_interval(),
                timeout: config.stream_timeout(),
            },
        )
        .with_availability(availability.clone()),
    );
    let queue = Arc::new(QueueRouter::new(
        registry.clone(),
        orchestrator,
        config.max_per_session,
        config.max_total,
        config.enqueue_timeout(),
    ));
    queue.spawn_eviction_listener();
    let coordinator = Arc::new(MultiSessionCoordinator::new(registry.clone(), queue.clone(), driver.clone()));

    let state = Arc::new(GatewayState {
        config: config.clone(),
        driver,
        registry: registry.clone(),
        queue,
        coordinator,
        availability,
        rate_limit,
        shutdown: shutdown.clone(),
    });

    tracing::info!(%addr, "antigravity-gateway listening");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            let ctrl_c = async { let _ = tokio::signal::ctrl_c().await; };
            tokio::select! {
                _ = ctrl_c => {}
                _ = shutdown.cancelled() => {}
            }
        }
    };
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await?;

    registry.stop_polling();
    // Give in-flight drains a moment to finish delivering their responses.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}
