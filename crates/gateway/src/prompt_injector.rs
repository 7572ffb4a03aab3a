// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-like prompt entry and submission into the agent surface's
//! contenteditable input.

use std::sync::Arc;
use std::time::Duration;

use crate::driver::{Capability, DriverError, DriverResult, FrameId, Key, UIDriver};
use crate::state_probe::StateProbe;

pub struct InjectOptions {
    /// If true, wait for the subsequent idle transition after submission.
    pub wait: bool,
    pub wait_timeout: Duration,
}

pub struct PromptInjector {
    driver: Arc<dyn UIDriver>,
    probe: StateProbe,
}

impl PromptInjector {
    pub fn new(driver: Arc<dyn UIDriver>) -> Self {
        let probe = StateProbe::new(driver.clone());
        Self { driver, probe }
    }

    /// Focus the prompt input, clear any stale content, type `text`
    /// verbatim, and submit with Enter. Does not validate that the input
    /// cleared afterward — the subsequent state transition is the caller's
    /// validation, observed by `StateProbe`.
    pub async fn inject(
        &self,
        frame: &FrameId,
        text: &str,
        options: &InjectOptions,
    ) -> DriverResult<()> {
        let locator = self.input_locator(frame).await?;

        self.driver.click(&locator).await.map_err(|_| {
            DriverError::NotFound("prompt input not clickable".to_owned())
        })?;
        self.driver.select_all(&locator).await?;
        self.driver.delete_selection(&locator).await?;
        self.driver.type_text(&locator, text).await?;
        self.driver
            .press_key(&locator, Key::Enter)
            .await
            .map_err(|e| DriverError::NotFound(format!("submit failed: {e}")))?;

        if options.wait {
            self.probe.wait_for_submission_idle(frame, options.wait_timeout).await?;
        }

        Ok(())
    }

    async fn input_locator(&self, frame: &FrameId) -> DriverResult<crate::driver::Locator> {
        let locators = self.driver.locate(frame, Capability::PromptInput).await?;
        locators
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NotFound("prompt input not found".to_owned()))
    }
}
