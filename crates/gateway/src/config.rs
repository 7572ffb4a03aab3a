// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the antigravity gateway.
#[derive(Debug, Clone, clap::Parser)]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "GATEWAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9900, env = "GATEWAY_PORT")]
    pub port: u16,

    /// Bearer token for API auth. If unset, auth is disabled.
    #[arg(long, env = "GATEWAY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Remote-debugging endpoint URL of the UI-driven desktop application.
    #[arg(long, default_value = "http://127.0.0.1:9222", env = "GATEWAY_REMOTE_DEBUG_URL")]
    pub remote_debug_url: String,

    /// Path to the availability-store JSON file.
    #[arg(long, default_value = "availability.json", env = "GATEWAY_AVAILABILITY_STORE_PATH")]
    pub availability_store_path: std::path::PathBuf,

    /// Session state poll interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "GATEWAY_STATE_POLL_MS")]
    pub state_poll_ms: u64,

    /// Stream-poller poll interval in milliseconds.
    #[arg(long, default_value_t = 300, env = "GATEWAY_STREAM_POLL_MS")]
    pub stream_poll_ms: u64,

    /// Stream-poller overall timeout in seconds.
    #[arg(long, default_value_t = 300, env = "GATEWAY_STREAM_TIMEOUT_SECS")]
    pub stream_timeout_secs: u64,

    /// Per-session prompt-cycle timeout in seconds (also the default request timeout).
    #[arg(long, default_value_t = 300, env = "GATEWAY_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Max in-flight queue items for a single session.
    #[arg(long, default_value_t = 5, env = "GATEWAY_MAX_PER_SESSION")]
    pub max_per_session: usize,

    /// Max in-flight queue items across all sessions.
    #[arg(long, default_value_t = 20, env = "GATEWAY_MAX_TOTAL")]
    pub max_total: usize,

    /// Enqueue timeout in seconds — how long `submit` waits for a queue slot.
    #[arg(long, default_value_t = 120, env = "GATEWAY_ENQUEUE_TIMEOUT_SECS")]
    pub enqueue_timeout_secs: u64,

    /// SSE heartbeat interval in seconds.
    #[arg(long, default_value_t = 30, env = "GATEWAY_SSE_HEARTBEAT_SECS")]
    pub sse_heartbeat_secs: u64,

    /// Max consecutive probe failures before a session is evicted from the registry.
    #[arg(long, default_value_t = 3, env = "GATEWAY_MAX_PROBE_FAILURES")]
    pub max_probe_failures: u32,
}

impl GatewayConfig {
    pub fn state_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.state_poll_ms)
    }

    pub fn stream_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stream_poll_ms)
    }

    pub fn stream_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn enqueue_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.enqueue_timeout_secs)
    }

    pub fn sse_heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sse_heartbeat_secs)
    }
}
