// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolves the active agent frame on a page, opening it if necessary.

use std::sync::Arc;
use std::time::Duration;

use crate::driver::{Capability, DriverError, FrameId, PageId, UIDriver};

const OPEN_WAIT: Duration = Duration::from_secs(2);

/// `FrameLocator` caches nothing across calls — pages may reload between
/// invocations, so every call re-resolves from scratch.
pub struct FrameLocator {
    driver: Arc<dyn UIDriver>,
}

impl FrameLocator {
    pub fn new(driver: Arc<dyn UIDriver>) -> Self {
        Self { driver }
    }

    /// Resolve the frame whose URL matches the agent-surface marker. If not
    /// immediately found, triggers the activity-bar toggle and retries once.
    pub async fn locate(&self, page: &PageId) -> Result<FrameId, DriverError> {
        if let Some(frame) = self.find_agent_frame(page).await? {
            return Ok(frame);
        }

        self.open_agent_panel(page).await?;

        if let Some(frame) = self.find_agent_frame(page).await? {
            return Ok(frame);
        }

        Err(DriverError::NotFound(format!("agent surface missing on page {}", page.0)))
    }

    async fn find_agent_frame(&self, page: &PageId) -> Result<Option<FrameId>, DriverError> {
        for frame in self.driver.frames(page).await? {
            if is_agent_surface(&self.driver.frame_url(&frame).await?) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    async fn open_agent_panel(&self, page: &PageId) -> Result<(), DriverError> {
        for frame in self.driver.frames(page).await? {
            let locators = self.driver.locate(&frame, Capability::AgentPanelToggle).await?;
            if let Some(locator) = locators.first() {
                self.driver.click(locator).await?;
                let _ = self.driver.wait_for_visible(locator, OPEN_WAIT).await;
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Whether a frame URL marks it as the agent chat surface rather than some
/// other embedded frame (e.g. a preview pane or extension host).
fn is_agent_surface(url: &str) -> bool {
    url.contains("agent") || url.contains("antigravity") || url.contains("chat")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    #[tokio::test]
    async fn finds_existing_agent_frame() {
        let fake = Arc::new(FakeDriver::new());
        let page = fake.add_page("https://workbench.example/project").await;
        fake.add_frame(&page, "https://workbench.example/agent-surface").await;

        let locator = FrameLocator::new(fake.clone());
        let frame = locator.locate(&page).await.expect("frame located");
        assert!(frame.0.contains("agent") || fake.frame_url(&frame).await.unwrap().contains("agent"));
    }

    #[tokio::test]
    async fn opens_panel_when_missing_then_fails_if_still_absent() {
        let fake = Arc::new(FakeDriver::new());
        let page = fake.add_page("https://workbench.example/project").await;
        fake.add_frame(&page, "https://workbench.example/editor").await;

        let locator = FrameLocator::new(fake.clone());
        let err = locator.locate(&page).await.expect_err("no agent surface available");
        assert!(matches!(err, DriverError::NotFound(_)));
    }
}
