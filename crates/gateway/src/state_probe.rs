// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classifies current session UI state from observable signals. Read-only
//! and side-effect-free; safe to call concurrently with another session's
//! mutation, never with its own.

use std::sync::Arc;
use std::time::Duration;

use crate::driver::{Capability, DriverError, DriverResult, FrameId, UIDriver};
use crate::model::{AgentState, StateSample};

/// How long to wait for the stop-affordance to appear at all before
/// concluding the prompt never registered as "thinking".
const ONSET_TIMEOUT: Duration = Duration::from_secs(2);

pub struct StateProbe {
    driver: Arc<dyn UIDriver>,
}

impl StateProbe {
    pub fn new(driver: Arc<dyn UIDriver>) -> Self {
        Self { driver }
    }

    /// Classify the current state of `frame`, evaluated in order:
    /// stop-affordance visible → thinking; else error toast visible →
    /// error; else idle.
    pub async fn sample(&self, frame: &FrameId) -> DriverResult<StateSample> {
        if self.is_visible_any(frame, Capability::StopAffordance).await? {
            return Ok(StateSample { state: AgentState::Thinking, is_input_enabled: false, error_message: None });
        }

        if let Some(message) = self.error_toast_text(frame).await? {
            return Ok(StateSample {
                state: AgentState::Error,
                is_input_enabled: false,
                error_message: Some(message),
            });
        }

        let input_enabled = self.is_visible_any(frame, Capability::PromptInput).await?;
        Ok(StateSample { state: AgentState::Idle, is_input_enabled: input_enabled, error_message: None })
    }

    /// Block until the stop-affordance has been observed hidden at least
    /// once, within `timeout`. Returns `TimeoutError` otherwise.
    pub async fn wait_for_idle(&self, frame: &FrameId, timeout: Duration) -> DriverResult<()> {
        let locators = self.driver.locate(frame, Capability::StopAffordance).await?;
        let Some(locator) = locators.first() else {
            // No stop affordance ever appeared to begin with; treat as already idle.
            return Ok(());
        };
        self.driver.wait_for_hidden(locator, timeout).await
    }

    /// Wait for the post-submission `thinking`→`idle` edge. Unlike
    /// `wait_for_idle`, a session that never shows the stop-affordance
    /// within `ONSET_TIMEOUT` is not treated as "already idle" — it is a
    /// lost prompt, since submission is assumed to always start a
    /// generation the UI observably enters.
    pub async fn wait_for_submission_idle(&self, frame: &FrameId, timeout: Duration) -> DriverResult<()> {
        let locators = self.driver.locate(frame, Capability::StopAffordance).await?;
        let Some(locator) = locators.first() else {
            return Err(DriverError::PromptLost("no stop affordance found after submission".to_owned()));
        };

        if !self.driver.is_visible(locator).await? {
            match self.driver.wait_for_visible(locator, timeout.min(ONSET_TIMEOUT)).await {
                Ok(()) => {}
                Err(DriverError::Timeout(_)) => {
                    return Err(DriverError::PromptLost(
                        "session stayed idle after submission; no thinking state observed".to_owned(),
                    ))
                }
                Err(other) => return Err(other),
            }
        }

        self.driver.wait_for_hidden(locator, timeout).await
    }

    async fn is_visible_any(&self, frame: &FrameId, capability: Capability) -> DriverResult<bool> {
        for locator in self.driver.locate(frame, capability).await? {
            if self.driver.is_visible(&locator).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn error_toast_text(&self, frame: &FrameId) -> DriverResult<Option<String>> {
        for locator in self.driver.locate(frame, Capability::ErrorToast).await? {
            if self.driver.is_visible(&locator).await? {
                return Ok(Some(self.driver.read_text(&locator).await?));
            }
        }
        Ok(None)
    }
}

/// Map a raw driver error onto the probe's own failure mode: a `NotFound`
/// locator during probing is not itself fatal to the caller's registry
/// bookkeeping, but `Unavailable` always is.
pub fn is_fatal_probe_error(err: &DriverError) -> bool {
    matches!(err, DriverError::Unavailable(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    async fn frame_with(fake: &Arc<FakeDriver>) -> FrameId {
        let page = fake.add_page("https://workbench.example/p").await;
        fake.add_frame(&page, "https://workbench.example/agent-surface").await
    }

    #[tokio::test]
    async fn idle_when_nothing_visible() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        let probe = StateProbe::new(fake.clone());
        let sample = probe.sample(&frame).await.expect("sample");
        assert_eq!(sample.state, AgentState::Idle);
    }

    #[tokio::test]
    async fn thinking_when_stop_affordance_visible() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        fake.set_visible("stop", true).await;

        let probe = StateProbe::new(fake.clone());
        let sample = probe.sample(&frame).await.expect("sample");
        assert_eq!(sample.state, AgentState::Thinking);
    }

    #[tokio::test]
    async fn error_when_toast_visible_and_stop_hidden() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::ErrorToast, "toast").await;
        fake.set_visible("toast", true).await;
        fake.set_text("toast", "something went wrong").await;

        let probe = StateProbe::new(fake.clone());
        let sample = probe.sample(&frame).await.expect("sample");
        assert_eq!(sample.state, AgentState::Error);
        assert_eq!(sample.error_message.as_deref(), Some("something went wrong"));
    }

    #[tokio::test]
    async fn stop_affordance_takes_priority_over_error_toast() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        fake.set_visible("stop", true).await;
        fake.set_capability(&frame, Capability::ErrorToast, "toast").await;
        fake.set_visible("toast", true).await;

        let probe = StateProbe::new(fake.clone());
        let sample = probe.sample(&frame).await.expect("sample");
        assert_eq!(sample.state, AgentState::Thinking);
    }

    #[tokio::test]
    async fn wait_for_idle_returns_when_stop_hidden() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        fake.set_visible("stop", true).await;

        let probe = StateProbe::new(fake.clone());
        let fake_bg = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fake_bg.set_visible("stop", false).await;
        });

        probe.wait_for_idle(&frame, Duration::from_millis(500)).await.expect("idle");
    }

    #[tokio::test]
    async fn wait_for_idle_times_out() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        fake.set_visible("stop", true).await;

        let probe = StateProbe::new(fake.clone());
        let err = probe
            .wait_for_idle(&frame, Duration::from_millis(30))
            .await
            .expect_err("should time out");
        assert!(matches!(err, DriverError::Timeout(_)));
    }

    #[tokio::test]
    async fn submission_idle_follows_thinking_then_idle_edge() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        fake.set_visible("stop", true).await;

        let probe = StateProbe::new(fake.clone());
        let fake_bg = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fake_bg.set_visible("stop", false).await;
        });

        probe.wait_for_submission_idle(&frame, Duration::from_millis(500)).await.expect("submission idle");
    }

    #[tokio::test]
    async fn submission_idle_rejects_prompt_lost_when_never_thinking() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;
        fake.set_capability(&frame, Capability::StopAffordance, "stop").await;
        // Stop affordance registered but never becomes visible: the prompt
        // never observably started generating.

        let probe = StateProbe::new(fake.clone());
        let err = probe
            .wait_for_submission_idle(&frame, Duration::from_millis(30))
            .await
            .expect_err("should report prompt lost");
        assert!(matches!(err, DriverError::PromptLost(_)));
    }

    #[tokio::test]
    async fn submission_idle_rejects_prompt_lost_when_no_stop_affordance_registered() {
        let fake = Arc::new(FakeDriver::new());
        let frame = frame_with(&fake).await;

        let probe = StateProbe::new(fake.clone());
        let err = probe
            .wait_for_submission_idle(&frame, Duration::from_millis(30))
            .await
            .expect_err("should report prompt lost");
        assert!(matches!(err, DriverError::PromptLost(_)));
    }
}
