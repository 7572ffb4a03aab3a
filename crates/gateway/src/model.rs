// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data types: session state, extracted responses, queue items, and
//! rate-limit records. Kept free of any driver or transport dependency so
//! every other module can share one vocabulary.

use serde::{Deserialize, Serialize};

/// The three UI states the registry distinguishes for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Thinking,
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one `StateProbe` call. Immutable, short-lived.
#[derive(Debug, Clone)]
pub struct StateSample {
    pub state: AgentState,
    pub is_input_enabled: bool,
    pub error_message: Option<String>,
}

/// A fenced code block pulled from the latest agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One semantically-recognized span of the assistant's turn other than plain
/// prose. `key` is stable for dedup across repeated extraction calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StructuredItem {
    User { content: String, key: String },
    Agent { content: String, key: String },
    Thought { content: String, key: String },
    Code { content: String, key: String },
    FileLink { content: String, key: String },
    FileActivity { content: String, key: String },
    FileChange { content: String, key: String },
    FileDiff { content: String, key: String },
    ToolCall { content: String, key: String },
    ToolCallArg { content: String, key: String },
    Terminal { content: String, key: String },
    Timestamp { content: String, key: String },
    Error { content: String, key: String },
    Image { content: String, key: String },
    Approval { content: String, key: String },
    TaskStatus { content: String, key: String },
    Table { content: String, key: String },
    /// Forward-compatible catch-all per the heuristic-extraction design note:
    /// unrecognized items are preserved, never dropped.
    Unknown { content: String, key: String },
}

impl StructuredItem {
    pub fn key(&self) -> &str {
        match self {
            Self::User { key, .. }
            | Self::Agent { key, .. }
            | Self::Thought { key, .. }
            | Self::Code { key, .. }
            | Self::FileLink { key, .. }
            | Self::FileActivity { key, .. }
            | Self::FileChange { key, .. }
            | Self::FileDiff { key, .. }
            | Self::ToolCall { key, .. }
            | Self::ToolCallArg { key, .. }
            | Self::Terminal { key, .. }
            | Self::Timestamp { key, .. }
            | Self::Error { key, .. }
            | Self::Image { key, .. }
            | Self::Approval { key, .. }
            | Self::TaskStatus { key, .. }
            | Self::Table { key, .. }
            | Self::Unknown { key, .. } => key,
        }
    }
}

/// Immutable snapshot of one prompt cycle's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    pub code_blocks: Vec<CodeBlock>,
    pub structured_items: Vec<StructuredItem>,
    pub timestamp: u64,
}

impl AgentResponse {
    pub fn empty(timestamp: u64) -> Self {
        Self {
            full_text: String::new(),
            thoughts: None,
            code_blocks: Vec::new(),
            structured_items: Vec::new(),
            timestamp,
        }
    }
}

/// A nullable, derived rate-limit observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub model: String,
    pub is_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_message: Option<String>,
}

/// Persisted form of a rate-limit observation, keyed by `(model, account)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub model: String,
    pub account: String,
    pub session_id: String,
    pub is_limited: bool,
    pub available_at: Option<chrono::DateTime<chrono::Utc>>,
    pub available_at_epoch_ms: u64,
    pub detected_at_epoch_ms: u64,
    pub source: String,
}

/// A tracked chat surface. Exclusive ownership by the `SessionRegistry`;
/// every other component borrows a handle for the duration of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    /// Opaque page-locator token, interpreted only by the driver.
    pub page_locator: String,
    /// Opaque frame-locator token, interpreted only by the driver.
    pub frame_locator: String,
    pub state: AgentState,
    pub last_activity_epoch_ms: u64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
