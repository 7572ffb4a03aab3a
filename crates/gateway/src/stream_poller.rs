// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polling-based delta extraction: converts `ResponseExtractor` +
//! `StateProbe` into a sequence of text deltas terminated by a completion
//! flag. The concatenation of all emitted `content` values is guaranteed to
//! equal the final extracted answer text (prefix property).

use std::sync::Arc;
use std::time::Duration;

use crate::driver::{DriverError, FrameId, UIDriver};
use crate::model::AgentState;
use crate::response_extractor::ResponseExtractor;
use crate::state_probe::StateProbe;

#[derive(Debug, Clone)]
pub struct StreamDelta {
    pub content: String,
    pub is_complete: bool,
    pub state: AgentState,
}

pub struct StreamOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(300), timeout: Duration::from_secs(300) }
    }
}

pub struct StreamPoller {
    probe: StateProbe,
    extractor: ResponseExtractor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    Error(String),
    Timeout,
    Driver(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(m) | Self::Driver(m) => write!(f, "{m}"),
            Self::Timeout => write!(f, "stream timed out"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamPoller {
    pub fn new(driver: Arc<dyn UIDriver>) -> Self {
        let probe = StateProbe::new(driver.clone());
        let extractor = ResponseExtractor::new(driver);
        Self { probe, extractor }
    }

    /// Poll `frame` on `options.poll_interval`, invoking `emit` with each
    /// delta, until an `idle` transition (following a prior `thinking`
    /// observation), an `error`, or `options.timeout` elapses. Returns the
    /// final full answer text on success.
    pub async fn run<F>(
        &self,
        frame: &FrameId,
        options: &StreamOptions,
        mut emit: F,
    ) -> Result<String, StreamError>
    where
        F: FnMut(StreamDelta),
    {
        let mut previous = String::new();
        let mut observed_thinking = false;
        let deadline = tokio::time::Instant::now() + options.timeout;
        let mut ticker = tokio::time::interval(options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if tokio::time::Instant::now() >= deadline {
                emit(StreamDelta { content: String::new(), is_complete: true, state: AgentState::Error });
                return Err(StreamError::Timeout);
            }

            let sample = match self.probe.sample(frame).await {
                Ok(s) => s,
                Err(e @ DriverError::Unavailable(_)) => return Err(StreamError::Driver(e.to_string())),
                Err(e) => return Err(StreamError::Driver(e.to_string())),
            };

            if sample.state == AgentState::Thinking {
                observed_thinking = true;
            }

            let current = self
                .extractor
                .extract_answer(frame)
                .await
                .map_err(|e| StreamError::Driver(e.to_string()))?;

            if current.len() > previous.len() && current.starts_with(previous.as_str()) {
                let delta = current[previous.len()..].to_owned();
                if !delta.is_empty() {
                    emit(StreamDelta { content: delta, is_complete: false, state: sample.state });
                }
            }
            previous = current.clone();

            match sample.state {
                AgentState::Idle if observed_thinking => {
                    emit(StreamDelta { content: String::new(), is_complete: true, state: AgentState::Idle });
                    return Ok(current);
                }
                AgentState::Error => {
                    let message = sample.error_message.unwrap_or_default();
                    emit(StreamDelta {
                        content: message.clone(),
                        is_complete: true,
                        state: AgentState::Error,
                    });
                    return Err(StreamError::Error(message));
                }
                _ => {}
            }
        }
    }
}
