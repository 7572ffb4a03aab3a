// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::error;

use gateway::config::GatewayConfig;
use gateway::driver::fake::FakeDriver;
use gateway::driver::UIDriver;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // This crate ships no concrete `UIDriver` implementation; standalone
    // runs of the binary drive an in-memory fake so the server is at least
    // reachable. Production deployments embed `gateway::run` directly with
    // their own remote-debugging-backed driver.
    let driver: Arc<dyn UIDriver> = Arc::new(FakeDriver::new());

    if let Err(e) = gateway::run(config, driver).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
