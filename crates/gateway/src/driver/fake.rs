// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `UIDriver` test double. Exposed unconditionally (not
//! `#[cfg(test)]`-gated, see `driver::fake`'s module doc) so both unit tests
//! and `tests/` integration tests can depend on it; this crate never ships a
//! concrete browser-automation driver — the real one is a collaborator
//! outside this crate's scope.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Capability, DriverError, DriverResult, FrameId, Key, Locator, PageId, UIDriver};

#[derive(Default)]
struct Element {
    visible: bool,
    text: String,
    attributes: HashMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    pages: HashMap<String, String>,
    page_titles: HashMap<String, String>,
    frames: HashMap<String, Vec<(String, String)>>,
    capabilities: HashMap<(String, Capability), Vec<String>>,
    elements: HashMap<String, Element>,
    clicks: Vec<String>,
    typed: HashMap<String, String>,
    broken_frames: std::collections::HashSet<String>,
    /// Locators that simulate the UI's own thinking→idle cycle after
    /// submission: `input locator -> (stop-affordance locator, think time)`.
    auto_submit: HashMap<String, (String, Duration)>,
}

/// A fully in-process fake of the remote-debug UI driver, built up via plain
/// setter methods rather than simulating an actual browser.
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
    counter: AtomicU64,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(FakeState::default())), counter: AtomicU64::new(0) }
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    pub async fn add_page(&self, url: &str) -> PageId {
        let id = self.next_id("page");
        let mut state = self.state.lock().await;
        state.pages.insert(id.clone(), url.to_owned());
        state.page_titles.insert(id.clone(), "untitled".to_owned());
        PageId(id)
    }

    pub async fn add_frame(&self, page: &PageId, url: &str) -> FrameId {
        let id = self.next_id("frame");
        let mut state = self.state.lock().await;
        state.frames.entry(page.0.clone()).or_default().push((id.clone(), url.to_owned()));
        FrameId(id)
    }

    /// Register a locator for a capability within a frame.
    pub async fn set_capability(&self, frame: &FrameId, capability: Capability, locator: &str) {
        let mut state = self.state.lock().await;
        state
            .capabilities
            .entry((frame.0.clone(), capability))
            .or_default()
            .push(locator.to_owned());
        state.elements.entry(locator.to_owned()).or_default();
    }

    pub async fn set_visible(&self, locator: &str, visible: bool) {
        let mut state = self.state.lock().await;
        state.elements.entry(locator.to_owned()).or_default().visible = visible;
    }

    pub async fn set_text(&self, locator: &str, text: &str) {
        let mut state = self.state.lock().await;
        state.elements.entry(locator.to_owned()).or_default().text = text.to_owned();
    }

    pub async fn set_attribute(&self, locator: &str, name: &str, value: &str) {
        let mut state = self.state.lock().await;
        state
            .elements
            .entry(locator.to_owned())
            .or_default()
            .attributes
            .insert(name.to_owned(), value.to_owned());
    }

    pub async fn frame_url(&self, frame: &FrameId) -> Option<String> {
        let state = self.state.lock().await;
        for frames in state.frames.values() {
            for (id, url) in frames {
                if id == &frame.0 {
                    return Some(url.clone());
                }
            }
        }
        None
    }

    pub async fn typed_text(&self, locator: &str) -> Option<String> {
        self.state.lock().await.typed.get(locator).cloned()
    }

    pub async fn clicks(&self) -> Vec<String> {
        self.state.lock().await.clicks.clone()
    }

    /// Mark a frame as unreachable: subsequent `locate`/`frame_url` calls on
    /// it fail with `DriverError::Unavailable`, simulating a closed page or
    /// a frame the remote-debug connection can no longer reach.
    pub async fn break_frame(&self, frame: &FrameId) {
        self.state.lock().await.broken_frames.insert(frame.0.clone());
    }

    /// Simulate a UI that, on each Enter-key submission against
    /// `input_locator`, shows `stop_locator` for `think_time` before hiding
    /// it again — the thinking→idle edge `StateProbe` requires after every
    /// prompt submission.
    pub async fn arm_auto_thinking(&self, input_locator: &str, stop_locator: &str, think_time: Duration) {
        let mut state = self.state.lock().await;
        state.auto_submit.insert(input_locator.to_owned(), (stop_locator.to_owned(), think_time));
        state.elements.entry(stop_locator.to_owned()).or_default();
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UIDriver for FakeDriver {
    async fn pages(&self) -> DriverResult<Vec<PageId>> {
        Ok(self.state.lock().await.pages.keys().cloned().map(PageId).collect())
    }

    async fn frames(&self, page: &PageId) -> DriverResult<Vec<FrameId>> {
        let state = self.state.lock().await;
        Ok(state
            .frames
            .get(&page.0)
            .map(|frames| frames.iter().map(|(id, _)| FrameId(id.clone())).collect())
            .unwrap_or_default())
    }

    async fn page_url(&self, page: &PageId) -> DriverResult<String> {
        self.state
            .lock()
            .await
            .pages
            .get(&page.0)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(page.0.clone()))
    }

    async fn page_title(&self, page: &PageId) -> DriverResult<String> {
        self.state
            .lock()
            .await
            .page_titles
            .get(&page.0)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(page.0.clone()))
    }

    async fn frame_url(&self, frame: &FrameId) -> DriverResult<String> {
        self.frame_url(frame).await.ok_or_else(|| DriverError::NotFound(frame.0.clone()))
    }

    async fn locate(&self, frame: &FrameId, capability: Capability) -> DriverResult<Vec<Locator>> {
        let state = self.state.lock().await;
        if state.broken_frames.contains(&frame.0) {
            return Err(DriverError::Unavailable(frame.0.clone()));
        }
        Ok(state
            .capabilities
            .get(&(frame.0.clone(), capability))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Locator)
            .collect())
    }

    async fn is_visible(&self, locator: &Locator) -> DriverResult<bool> {
        Ok(self.state.lock().await.elements.get(&locator.0).map(|e| e.visible).unwrap_or(false))
    }

    async fn click(&self, locator: &Locator) -> DriverResult<()> {
        self.state.lock().await.clicks.push(locator.0.clone());
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> DriverResult<()> {
        let mut state = self.state.lock().await;
        state.typed.insert(locator.0.clone(), text.to_owned());
        state.elements.entry(locator.0.clone()).or_default().text = text.to_owned();
        Ok(())
    }

    async fn select_all(&self, _locator: &Locator) -> DriverResult<()> {
        Ok(())
    }

    async fn delete_selection(&self, locator: &Locator) -> DriverResult<()> {
        self.state.lock().await.elements.entry(locator.0.clone()).or_default().text.clear();
        Ok(())
    }

    async fn press_key(&self, locator: &Locator, key: Key) -> DriverResult<()> {
        if matches!(key, Key::Enter) {
            let armed = self.state.lock().await.auto_submit.get(&locator.0).cloned();
            if let Some((stop_locator, think_time)) = armed {
                {
                    let mut state = self.state.lock().await;
                    state.elements.entry(stop_locator.clone()).or_default().visible = true;
                }
                let state = self.state.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(think_time).await;
                    state.lock().await.elements.entry(stop_locator).or_default().visible = false;
                });
            }
        }
        Ok(())
    }

    async fn read_text(&self, locator: &Locator) -> DriverResult<String> {
        Ok(self.state.lock().await.elements.get(&locator.0).map(|e| e.text.clone()).unwrap_or_default())
    }

    async fn read_attribute(&self, locator: &Locator, name: &str) -> DriverResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .await
            .elements
            .get(&locator.0)
            .and_then(|e| e.attributes.get(name).cloned()))
    }

    async fn wait_for_visible(
        &self,
        locator: &Locator,
        timeout: std::time::Duration,
    ) -> DriverResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_visible(locator).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(locator.0.clone()));
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_hidden(
        &self,
        locator: &Locator,
        timeout: std::time::Duration,
    ) -> DriverResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_visible(locator).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(locator.0.clone()));
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

pub fn arc_fake() -> Arc<FakeDriver> {
    Arc::new(FakeDriver::new())
}
