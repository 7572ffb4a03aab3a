// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives one chat-completion request end to end: optional fresh-conversation
//! click, prompt rendering, injection, extraction, and OpenAI envelope
//! construction — streaming or not.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::driver::{Capability, DriverError, FrameId, UIDriver};
use crate::error::GatewayError;
use crate::model::{epoch_ms, AgentResponse, SessionHandle};
use crate::prompt_injector::{InjectOptions, PromptInjector};
use crate::queue::Job;
use crate::rate_limit::availability_store::AvailabilityStore;
use crate::rate_limit::RateLimitDetector;
use crate::response_extractor::ResponseExtractor;
use crate::stream_poller::{StreamOptions, StreamPoller};

pub const DEFAULT_MODEL: &str = "gemini-antigravity";

/// Account key used to persist rate-limit observations when the caller's
/// request carries no account identity of its own (the OpenAI-compatible
/// surface has no auth-derived account concept — see §6).
const DEFAULT_ACCOUNT: &str = "default";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub new_conversation: bool,
}

impl ChatCompletionRequest {
    pub fn simple(prompt: &str) -> Self {
        Self {
            model: None,
            messages: vec![ChatMessage { role: "user".to_owned(), content: prompt.to_owned() }],
            temperature: None,
            max_tokens: None,
            stream: false,
            session: None,
            new_conversation: false,
        }
    }

    /// Entry validation per the orchestrator's rules: non-empty messages,
    /// valid roles, at least one user message, non-empty-trimmed user
    /// content.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::Validation("messages must not be empty".to_owned()));
        }
        let mut has_user = false;
        for message in &self.messages {
            match message.role.as_str() {
                "system" | "assistant" => {}
                "user" => {
                    has_user = true;
                    if message.content.trim().is_empty() {
                        return Err(GatewayError::Validation(
                            "user message content must not be empty".to_owned(),
                        ));
                    }
                }
                other => {
                    return Err(GatewayError::Validation(format!("unsupported message role: {other}")))
                }
            }
        }
        if !has_user {
            return Err(GatewayError::Validation("at least one user message is required".to_owned()));
        }
        Ok(())
    }

    fn render_prompt(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", capitalize(&m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Usage,
    pub session_id: String,
}

fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f64) / 4.0).ceil() as u32
}

fn completion_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let suffix: String = (0..10)
        .map(|_| CHARSET[(rand::random::<u32>() as usize) % CHARSET.len()] as char)
        .collect();
    format!("chatcmpl-{suffix}")
}

pub struct CompletionOrchestrator {
    driver: Arc<dyn UIDriver>,
    injector: PromptInjector,
    extractor: ResponseExtractor,
    stream_poller: StreamPoller,
    rate_limit: RateLimitDetector,
    availability: Option<Arc<AvailabilityStore>>,
    default_model: String,
    inject_timeout: Duration,
    stream_options: StreamOptions,
}

impl CompletionOrchestrator {
    pub fn new(driver: Arc<dyn UIDriver>, default_model: impl Into<String>, inject_timeout: Duration) -> Self {
        Self::with_stream_options(driver, default_model, inject_timeout, StreamOptions::default())
    }

    pub fn with_stream_options(
        driver: Arc<dyn UIDriver>,
        default_model: impl Into<String>,
        inject_timeout: Duration,
        stream_options: StreamOptions,
    ) -> Self {
        Self {
            injector: PromptInjector::new(driver.clone()),
            extractor: ResponseExtractor::new(driver.clone()),
            stream_poller: StreamPoller::new(driver.clone()),
            rate_limit: RateLimitDetector::new(driver.clone()),
            availability: None,
            driver,
            default_model: default_model.into(),
            inject_timeout,
            stream_options,
        }
    }

    /// Attach an `AvailabilityStore` so rate-limit banners observed mid-flight
    /// (§7's `RateLimitObserved` row) are persisted rather than only
    /// surfaced in-band.
    pub fn with_availability(mut self, availability: Arc<AvailabilityStore>) -> Self {
        self.availability = Some(availability);
        self
    }

    /// After a prompt cycle, check the frame for a quota banner. If present:
    /// persist it (when an availability store is attached), dismiss it, and
    /// fold its raw text into the response in-band rather than failing the
    /// request — per §7, `RateLimitObserved` never aborts the request that
    /// observed it.
    async fn observe_rate_limit(&self, handle: &SessionHandle, frame: &FrameId, response: &mut AgentResponse) {
        let Ok(Some(info)) = self.rate_limit.detect(frame).await else { return };

        if let Some(store) = &self.availability {
            let _ = store.persist(&info, DEFAULT_ACCOUNT, &handle.id, "inline").await;
        }
        let _ = self.rate_limit.dismiss(frame).await;

        if let Some(raw) = &info.raw_message {
            if !response.full_text.is_empty() {
                response.full_text.push_str("\n\n");
            }
            response.full_text.push_str(raw);
        }
    }

    /// Dispatch a dequeued job against its resolved session, delivering the
    /// result over whichever channel the job carries.
    pub async fn process(&self, handle: &SessionHandle, job: Job) {
        match job {
            Job::Respond { request, respond } => {
                let result = self.run_once(handle, &request).await;
                let _ = respond.send(result);
            }
            Job::Stream { request, chunks, done } => {
                let result = self.run_streaming(handle, &request, &chunks).await;
                let _ = done.send(result);
            }
        }
    }

    async fn maybe_new_conversation(&self, frame: &FrameId, request: &ChatCompletionRequest) {
        if !request.new_conversation {
            return;
        }
        if let Ok(locators) = self.driver.locate(frame, Capability::NewConversationButton).await {
            if let Some(locator) = locators.first() {
                let _ = self.driver.click(locator).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }
    }

    fn model_name(&self, request: &ChatCompletionRequest) -> String {
        request.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn build_response(&self, handle: &SessionHandle, request: &ChatCompletionRequest, response: AgentResponse) -> ChatCompletionResponse {
        let prompt_tokens = estimate_tokens(&request.render_prompt());
        let completion_tokens = estimate_tokens(&response.full_text);
        ChatCompletionResponse {
            id: completion_id(),
            object: "chat.completion",
            created: epoch_ms() / 1000,
            model: self.model_name(request),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage { role: "assistant".to_owned(), content: response.full_text },
                finish_reason: "stop".to_owned(),
            }],
            usage: Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens },
            session_id: handle.id.clone(),
        }
    }

    async fn run_once(
        &self,
        handle: &SessionHandle,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        request.validate()?;
        let frame = FrameId(handle.frame_locator.clone());

        self.maybe_new_conversation(&frame, request).await;

        let prompt = request.render_prompt();
        self.injector
            .inject(&frame, &prompt, &InjectOptions { wait: true, wait_timeout: self.inject_timeout })
            .await
            .map_err(driver_error_to_gateway)?;

        let mut extracted = self.extractor.extract(&frame).await.map_err(driver_error_to_gateway)?;
        self.observe_rate_limit(handle, &frame, &mut extracted).await;
        Ok(self.build_response(handle, request, extracted))
    }

    async fn run_streaming(
        &self,
        handle: &SessionHandle,
        request: &ChatCompletionRequest,
        chunks: &mpsc::UnboundedSender<String>,
    ) -> Result<(), GatewayError> {
        request.validate()?;
        let frame = FrameId(handle.frame_locator.clone());

        self.maybe_new_conversation(&frame, request).await;

        let prompt = request.render_prompt();
        self.injector
            .inject(&frame, &prompt, &InjectOptions { wait: false, wait_timeout: self.inject_timeout })
            .await
            .map_err(driver_error_to_gateway)?;

        let id = completion_id();
        let created = epoch_ms() / 1000;
        let model = self.model_name(request);

        let _ = chunks.send(chunk_json(&id, created, &model, Some("assistant"), "", None));

        let result = self
            .stream_poller
            .run(&frame, &self.stream_options, |delta| {
                if !delta.content.is_empty() {
                    let _ = chunks.send(chunk_json(&id, created, &model, None, &delta.content, None));
                }
            })
            .await;

        match result {
            Ok(_) => {
                if let Ok(Some(info)) = self.rate_limit.detect(&frame).await {
                    if let Some(store) = &self.availability {
                        let _ = store.persist(&info, DEFAULT_ACCOUNT, &handle.id, "inline").await;
                    }
                    let _ = self.rate_limit.dismiss(&frame).await;
                    if let Some(raw) = &info.raw_message {
                        let _ = chunks.send(chunk_json(&id, created, &model, None, raw, None));
                    }
                }
                let _ = chunks.send(chunk_json(&id, created, &model, None, "", Some("stop")));
                let _ = chunks.send("[DONE]".to_owned());
                Ok(())
            }
            Err(err) => {
                let _ = chunks.send(chunk_json(&id, created, &model, None, "", Some("stop")));
                let _ = chunks.send("[DONE]".to_owned());
                Err(GatewayError::Internal(err.to_string()))
            }
        }
    }
}

fn chunk_json(
    id: &str,
    created: u64,
    model: &str,
    role: Option<&str>,
    content: &str,
    finish_reason: Option<&str>,
) -> String {
    let mut delta = serde_json::Map::new();
    if let Some(role) = role {
        delta.insert("role".to_owned(), serde_json::Value::String(role.to_owned()));
    }
    if !content.is_empty() || (role.is_none() && finish_reason.is_none()) {
        delta.insert("content".to_owned(), serde_json::Value::String(content.to_owned()));
    }
    let payload = serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    payload.to_string()
}

fn driver_error_to_gateway(err: DriverError) -> GatewayError {
    match err {
        DriverError::Unavailable(_) => GatewayError::Unavailable,
        DriverError::NotFound(m) => GatewayError::NotFound(m),
        DriverError::Timeout(m) => GatewayError::Timeout(m),
        DriverError::PromptLost(m) => GatewayError::PromptLost(m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::model::AgentState;

    fn handle(frame: &str) -> SessionHandle {
        SessionHandle {
            id: "s1".to_owned(),
            page_locator: "page".to_owned(),
            frame_locator: frame.to_owned(),
            state: AgentState::Idle,
            last_activity_epoch_ms: 0,
            title: "t".to_owned(),
            workspace: None,
        }
    }

    #[test]
    fn validate_rejects_empty_messages() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![],
            temperature: None,
            max_tokens: None,
            stream: false,
            session: None,
            new_conversation: false,
        };
        assert!(matches!(req.validate(), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn validate_rejects_missing_user_role() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessage { role: "system".to_owned(), content: "hi".to_owned() }],
            temperature: None,
            max_tokens: None,
            stream: false,
            session: None,
            new_conversation: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_user_content() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessage { role: "user".to_owned(), content: "   ".to_owned() }],
            temperature: None,
            max_tokens: None,
            stream: false,
            session: None,
            new_conversation: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn render_prompt_joins_with_separator() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![
                ChatMessage { role: "system".to_owned(), content: "be terse".to_owned() },
                ChatMessage { role: "user".to_owned(), content: "hi".to_owned() },
            ],
            temperature: None,
            max_tokens: None,
            stream: false,
            session: None,
            new_conversation: false,
        };
        assert_eq!(req.render_prompt(), "System: be terse\n\n---\n\nUser: hi");
    }

    /// Register a stop-affordance that is visible when `run_once` submits
    /// and flips hidden shortly after, so `wait_for_submission_idle`
    /// observes the required thinking→idle edge instead of reporting the
    /// prompt lost.
    async fn arm_thinking_then_idle(fake: &Arc<FakeDriver>, frame: &FrameId) {
        fake.set_capability(frame, Capability::StopAffordance, "stop").await;
        fake.set_visible("stop", true).await;
        let fake_bg = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            fake_bg.set_visible("stop", false).await;
        });
    }

    #[tokio::test]
    async fn run_once_builds_envelope_with_usage_estimate() {
        let fake = Arc::new(FakeDriver::new());
        let page = fake.add_page("https://workbench.example/p").await;
        let frame = fake.add_frame(&page, "https://workbench.example/agent-surface").await;
        fake.set_capability(&frame, Capability::PromptInput, "input").await;
        fake.set_visible("input", true).await;
        fake.set_capability(&frame, Capability::AnswerBlock, "answer").await;
        fake.set_text("answer", "Hello, world.").await;
        arm_thinking_then_idle(&fake, &frame).await;

        let orchestrator = CompletionOrchestrator::new(fake.clone(), DEFAULT_MODEL, Duration::from_secs(5));
        let request = ChatCompletionRequest::simple("hi there");
        let handle = handle(&frame.0);

        let response = orchestrator.run_once(&handle, &request).await.expect("completion");
        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.choices[0].message.content, "Hello, world.");
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.session_id, "s1");
        assert!(response.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn run_once_empty_answer_still_builds_valid_envelope() {
        let fake = Arc::new(FakeDriver::new());
        let page = fake.add_page("https://workbench.example/p").await;
        let frame = fake.add_frame(&page, "https://workbench.example/agent-surface").await;
        fake.set_capability(&frame, Capability::PromptInput, "input").await;
        fake.set_visible("input", true).await;
        arm_thinking_then_idle(&fake, &frame).await;

        let orchestrator = CompletionOrchestrator::new(fake.clone(), DEFAULT_MODEL, Duration::from_secs(5));
        let request = ChatCompletionRequest::simple("hi there");
        let handle = handle(&frame.0);

        let response = orchestrator.run_once(&handle, &request).await.expect("completion");
        assert_eq!(response.choices[0].message.content, "");
        assert_eq!(response.choices[0].finish_reason, "stop");
    }

    #[tokio::test]
    async fn run_once_reports_prompt_lost_when_never_thinking() {
        let fake = Arc::new(FakeDriver::new());
        let page = fake.add_page("https://workbench.example/p").await;
        let frame = fake.add_frame(&page, "https://workbench.example/agent-surface").await;
        fake.set_capability(&frame, Capability::PromptInput, "input").await;
        fake.set_visible("input", true).await;
        // No stop-affordance ever registered: the UI never visibly started
        // generating, so the session is effectively "immediately idle".

        let orchestrator = CompletionOrchestrator::new(fake.clone(), DEFAULT_MODEL, Duration::from_millis(50));
        let request = ChatCompletionRequest::simple("hi there");
        let handle = handle(&frame.0);

        let err = orchestrator.run_once(&handle, &request).await.expect_err("should report prompt lost");
        assert!(matches!(err, GatewayError::PromptLost(_)));
    }

    #[tokio::test]
    async fn run_once_surfaces_rate_limit_banner_in_band_and_persists() {
        let fake = Arc::new(FakeDriver::new());
        let page = fake.add_page("https://workbench.example/p").await;
        let frame = fake.add_frame(&page, "https://workbench.example/agent-surface").await;
        fake.set_capability(&frame, Capability::PromptInput, "input").await;
        fake.set_visible("input", true).await;
        fake.set_capability(&frame, Capability::AnswerBlock, "answer").await;
        fake.set_text("answer", "partial answer").await;
        fake.set_capability(&frame, Capability::RateLimitBanner, "banner").await;
        fake.set_capability(&frame, Capability::RateLimitDismiss, "dismiss").await;
        fake.set_visible("banner", true).await;
        fake.set_visible("dismiss", true).await;
        fake.set_text(
            "banner",
            "Model quota limit for MX. You can resume using this model at 2031-01-02T03:04:05Z.",
        )
        .await;
        arm_thinking_then_idle(&fake, &frame).await;

        let availability = Arc::new(crate::rate_limit::availability_store::AvailabilityStore::in_memory());
        let orchestrator =
            CompletionOrchestrator::new(fake.clone(), DEFAULT_MODEL, Duration::from_secs(5)).with_availability(availability.clone());
        let request = ChatCompletionRequest::simple("hi there");
        let handle = handle(&frame.0);

        let response = orchestrator.run_once(&handle, &request).await.expect("completion");
        assert!(response.choices[0].message.content.starts_with("partial answer"));
        assert!(response.choices[0].message.content.contains("quota limit for MX"));

        let current = availability.get_current("MX", "default").await.expect("persisted");
        assert!(current.is_limited);
        assert_eq!(fake.clicks().await.last().map(String::as_str), Some("dismiss"));
    }
}
