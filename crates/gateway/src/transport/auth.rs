// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::GatewayState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), GatewayError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(GatewayError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(GatewayError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// An SSE subscription's initial connection is exempt from bearer auth, the
/// same way `coopmux` exempts `/ws/` — these are the all-session and
/// per-session event feeds.
fn is_exempt_sse_path(path: &str) -> bool {
    path == "/v1/sessions/stream" || path.ends_with("/events")
}

/// Axum middleware enforcing Bearer token auth. Exempt: `/health`,
/// `OPTIONS` preflight requests, and the SSE session-event streams.
pub async fn auth_layer(
    state: State<Arc<GatewayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health"
        || req.method() == axum::http::Method::OPTIONS
        || is_exempt_sse_path(req.uri().path())
    {
        return next.run(req).await;
    }

    if let Err(err) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        return err.to_http_response().into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn no_expected_token_always_passes() {
        let headers = HeaderMap::new();
        assert!(validate_bearer(&headers, None).is_ok());
    }

    #[test]
    fn rejects_missing_header_when_token_configured() {
        let headers = HeaderMap::new();
        assert!(validate_bearer(&headers, Some("secret")).is_err());
    }

    #[test]
    fn accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(validate_bearer(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn rejects_mismatched_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(validate_bearer(&headers, Some("secret")).is_err());
    }

    #[test]
    fn sse_stream_paths_are_exempt() {
        assert!(is_exempt_sse_path("/v1/sessions/stream"));
        assert!(is_exempt_sse_path("/v1/sessions/abc123/events"));
        assert!(!is_exempt_sse_path("/v1/sessions"));
        assert!(!is_exempt_sse_path("/v1/chat/completions"));
    }
}
