// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds for the gateway API, per the error-handling design table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// `UnavailableError` — the remote-debug driver is disconnected.
    Unavailable,
    /// `NotFoundError` — a locator matched zero elements after retry.
    NotFound(String),
    /// `GET /v1/models/{id}` for an id that isn't the stand-in model.
    /// Distinct from `NotFound` (a driver locator miss, 500 per §7) — this
    /// is an ordinary REST "no such resource" and is explicitly 404.
    UnknownModel(String),
    /// `TimeoutError` — a state wait or enqueue wait exceeded its bound.
    Timeout(String),
    /// The session was observed idle immediately after prompt submission
    /// without ever transitioning through `thinking` — the prompt was lost.
    PromptLost(String),
    /// `ValidationError` — the chat-completion request body failed entry validation.
    Validation(String),
    /// `QueueFullSession` — per-session queue depth at capacity.
    QueueFullSession,
    /// `QueueFullGlobal` — global queue depth at capacity.
    QueueFullGlobal,
    /// `NoSession` — the router could not resolve a target session.
    NoSession,
    /// Bearer token missing or invalid.
    Unauthorized,
    /// Unexpected internal failure.
    Internal(String),
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unavailable => 500,
            Self::NotFound(_) => 500,
            Self::UnknownModel(_) => 404,
            Self::Timeout(_) => 504,
            Self::PromptLost(_) => 500,
            Self::Validation(_) => 400,
            Self::QueueFullSession | Self::QueueFullGlobal => 429,
            Self::NoSession => 503,
            Self::Unauthorized => 401,
            Self::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnknownModel(_) => "MODEL_NOT_FOUND",
            Self::Timeout(_) => "TIMEOUT",
            Self::PromptLost(_) => "PROMPT_LOST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::QueueFullSession => "QUEUE_FULL_SESSION",
            Self::QueueFullGlobal => "QUEUE_FULL_GLOBAL",
            Self::NoSession => "NO_SESSION",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unavailable => "the driver connection to the remote application is unavailable"
                .to_owned(),
            Self::NotFound(m)
            | Self::UnknownModel(m)
            | Self::Timeout(m)
            | Self::PromptLost(m)
            | Self::Validation(m)
            | Self::Internal(m) => m.clone(),
            Self::QueueFullSession => "this session's request queue is full".to_owned(),
            Self::QueueFullGlobal => "the gateway's request queue is full".to_owned(),
            Self::NoSession => "no session available to handle this request".to_owned(),
            Self::Unauthorized => "missing or invalid bearer token".to_owned(),
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            message: self.message(),
            r#type: "api_error".to_owned(),
            code: self.http_status(),
        }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: self.to_error_body() }))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for GatewayError {}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        self.to_http_response().into_response()
    }
}

/// Top-level error response envelope, OpenAI-shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}
