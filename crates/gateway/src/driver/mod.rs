// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `UIDriver`: the sole bridge to the remote-debugging–enabled application.
//! Every DOM-level operation the rest of the crate performs funnels through
//! this trait. No component outside this module stores transport state
//! beyond a connected driver handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// In-memory `UIDriver` test double, exposed unconditionally (not
/// `#[cfg(test)]`-gated) so both unit tests and `tests/` integration tests
/// can depend on it.
pub mod fake;

/// Opaque handle to a top-level page (browser tab/window) in the remote app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

/// Opaque handle to an inner frame within a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

/// Opaque handle to one or more DOM elements matching a capability
/// predicate within a frame (e.g. "the element that accepts user text").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(pub String);

/// A capability predicate describing *what* to find, never a CSS string.
/// Selector strategy is centralized in the driver implementation so a
/// selector-layer swap never changes behavior elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The contenteditable rich-text prompt input.
    PromptInput,
    /// The affordance that halts in-progress generation.
    StopAffordance,
    /// An error toast or alert surfaced by the chat surface.
    ErrorToast,
    /// The activity-bar item that opens the agent surface.
    AgentPanelToggle,
    /// The "thought" disclosure toggle on the latest turn.
    ThoughtToggle,
    /// The prose block containing expanded thought content.
    ThoughtBlock,
    /// The latest non-thought prose block of the current assistant turn.
    AnswerBlock,
    /// Every fenced/annotated code element in the current turn.
    CodeBlock,
    /// The affordance that starts a fresh conversation.
    NewConversationButton,
    /// The rate-limit quota banner.
    RateLimitBanner,
    /// The banner's dismiss affordance.
    RateLimitDismiss,
    /// The banner's "use a different model" affordance.
    RateLimitSelectAnother,
    /// The model picker trigger.
    ModelPicker,
    /// Each option row within an open model picker.
    ModelPickerOption,
    /// Each semantically-distinct span of the assistant's current turn
    /// other than plain prose, the candidate pool `ResponseExtractor`
    /// classifies into a `StructuredItem` variant.
    TurnItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The remote-debug connection was lost.
    Unavailable(String),
    /// A locator matched zero elements.
    NotFound(String),
    /// A wait-for-visible/hidden bound elapsed.
    Timeout(String),
    /// A session was observed idle immediately after prompt submission
    /// without ever transitioning through `thinking` first, so the response
    /// that follows cannot be trusted to belong to this submission.
    PromptLost(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(m) => write!(f, "driver unavailable: {m}"),
            Self::NotFound(m) => write!(f, "locator not found: {m}"),
            Self::Timeout(m) => write!(f, "driver timeout: {m}"),
            Self::PromptLost(m) => write!(f, "prompt lost: {m}"),
        }
    }
}

impl std::error::Error for DriverError {}

pub type DriverResult<T> = Result<T, DriverError>;

/// A single named key for `press`, independent of the driver backend's own
/// key-event representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    Tab,
}

/// The external collaborator this crate drives but never implements: a
/// remote-debugging client attached to a running desktop browser
/// application. Implementations live outside this crate's core; tests
/// substitute an in-memory fake.
#[async_trait]
pub trait UIDriver: Send + Sync {
    /// Enumerate currently open top-level pages.
    async fn pages(&self) -> DriverResult<Vec<PageId>>;

    /// Enumerate inner frames of a page.
    async fn frames(&self, page: &PageId) -> DriverResult<Vec<FrameId>>;

    /// Read the current URL of a page.
    async fn page_url(&self, page: &PageId) -> DriverResult<String>;

    /// Read the current title of a page.
    async fn page_title(&self, page: &PageId) -> DriverResult<String>;

    /// Read the current URL of a frame.
    async fn frame_url(&self, frame: &FrameId) -> DriverResult<String>;

    /// Resolve a capability predicate within a frame to zero-or-more
    /// matching locators. `NotFoundError` is signaled by an empty result,
    /// not necessarily an `Err`.
    async fn locate(&self, frame: &FrameId, capability: Capability) -> DriverResult<Vec<Locator>>;

    /// Whether a locator currently resolves to a visible element.
    async fn is_visible(&self, locator: &Locator) -> DriverResult<bool>;

    /// Click the element behind a locator.
    async fn click(&self, locator: &Locator) -> DriverResult<()>;

    /// Type text into the element behind a locator, verbatim.
    async fn type_text(&self, locator: &Locator, text: &str) -> DriverResult<()>;

    /// Select all content currently in the element behind a locator.
    async fn select_all(&self, locator: &Locator) -> DriverResult<()>;

    /// Delete the current selection in the element behind a locator.
    async fn delete_selection(&self, locator: &Locator) -> DriverResult<()>;

    /// Press a named key while the element behind a locator is focused.
    async fn press_key(&self, locator: &Locator, key: Key) -> DriverResult<()>;

    /// Read the text content of the element behind a locator. Empty string
    /// if the locator currently matches nothing transient (callers treat
    /// vanished text as "no content yet", not as an error).
    async fn read_text(&self, locator: &Locator) -> DriverResult<String>;

    /// Read an attribute of the element behind a locator, if present.
    async fn read_attribute(&self, locator: &Locator, name: &str) -> DriverResult<Option<String>>;

    /// Block until a locator becomes visible or `timeout` elapses.
    async fn wait_for_visible(
        &self,
        locator: &Locator,
        timeout: std::time::Duration,
    ) -> DriverResult<()>;

    /// Block until a locator becomes hidden (or disappears) or `timeout`
    /// elapses.
    async fn wait_for_hidden(
        &self,
        locator: &Locator,
        timeout: std::time::Duration,
    ) -> DriverResult<()>;
}
