// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate-limit banner detection: parsing the quota-exceeded banner, dismiss/
//! select-another affordances, and a model-picker sweep. Pure parsing plus
//! narrow driver interaction — no persistence (see `availability_store`).

pub mod availability_store;

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;

use crate::driver::{Capability, DriverResult, FrameId, UIDriver};
use crate::model::RateLimitInfo;

pub struct RateLimitDetector {
    driver: Arc<dyn UIDriver>,
}

impl RateLimitDetector {
    pub fn new(driver: Arc<dyn UIDriver>) -> Self {
        Self { driver }
    }

    /// Scan the frame for a quota banner. Returns `None` if no banner is
    /// present. Parse failures are not fatal — the raw text is preserved
    /// with `available_at: None`.
    pub async fn detect(&self, frame: &FrameId) -> DriverResult<Option<RateLimitInfo>> {
        let locators = self.driver.locate(frame, Capability::RateLimitBanner).await?;
        let Some(locator) = locators.first() else {
            return Ok(None);
        };
        if !self.driver.is_visible(locator).await? {
            return Ok(None);
        }
        let text = self.driver.read_text(locator).await?;
        Ok(Some(parse_banner(&text)))
    }

    /// Click the banner's dismiss affordance. Returns whether a banner was
    /// present to dismiss; a no-op on an absent banner returns `false`.
    pub async fn dismiss(&self, frame: &FrameId) -> DriverResult<bool> {
        let locators = self.driver.locate(frame, Capability::RateLimitDismiss).await?;
        let Some(locator) = locators.first() else {
            return Ok(false);
        };
        if !self.driver.is_visible(locator).await? {
            return Ok(false);
        }
        self.driver.click(locator).await?;
        Ok(true)
    }

    /// Click the banner's "use a different model" affordance.
    pub async fn select_another_model(&self, frame: &FrameId) -> DriverResult<bool> {
        let locators = self.driver.locate(frame, Capability::RateLimitSelectAnother).await?;
        let Some(locator) = locators.first() else {
            return Ok(false);
        };
        self.driver.click(locator).await?;
        Ok(true)
    }

    /// Open the model picker, mark each option carrying a warning indicator
    /// as limited, and close the picker before returning.
    pub async fn scan_all_model_limits(&self, frame: &FrameId) -> DriverResult<Vec<RateLimitInfo>> {
        let pickers = self.driver.locate(frame, Capability::ModelPicker).await?;
        let Some(picker) = pickers.first() else {
            return Ok(Vec::new());
        };
        self.driver.click(picker).await?;

        let mut results = Vec::new();
        for option in self.driver.locate(frame, Capability::ModelPickerOption).await? {
            let model = self.driver.read_text(&option).await?;
            let warning = self.driver.read_attribute(&option, "data-limited").await?;
            if warning.is_some() {
                results.push(RateLimitInfo {
                    model,
                    is_limited: true,
                    available_at: None,
                    raw_message: None,
                });
            }
        }

        // Close the picker by clicking its trigger again.
        self.driver.click(picker).await?;
        Ok(results)
    }
}

fn banner_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(
            r"(?s)quota limit for\s+(?P<model>[^.]+)\..*resume using this model at\s+(?P<resume>[^.]+)\.",
        )
        .unwrap()
    })
}

/// Parse `model` (between "quota limit for" and ".") and `resume instant`
/// (between "resume using this model at" and ".") out of a banner's raw
/// text. A failed parse still yields a `RateLimitInfo` with the raw text
/// preserved and `available_at: None` — parse failure is never fatal.
pub fn parse_banner(text: &str) -> RateLimitInfo {
    let captures = banner_regex().captures(text);
    let Some(captures) = captures else {
        return RateLimitInfo {
            model: String::new(),
            is_limited: true,
            available_at: None,
            raw_message: Some(text.to_owned()),
        };
    };

    let model = captures.name("model").map(|m| m.as_str().trim().to_owned()).unwrap_or_default();
    let resume = captures.name("resume").map(|m| m.as_str().trim());
    let available_at =
        resume.and_then(|r| chrono::DateTime::parse_from_rfc3339(r).ok()).map(|dt| dt.with_timezone(&chrono::Utc));

    RateLimitInfo { model, is_limited: true, available_at, raw_message: Some(text.to_owned()) }
}
