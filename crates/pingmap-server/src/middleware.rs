use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::ApiError;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Bearer secret guarding the clear-all route.
#[derive(Clone)]
pub struct AuthState {
    admin_token: Option<Arc<str>>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl AuthState {
    /// Builds auth from the configured `PINGMAP_ADMIN_TOKEN`.
    ///
    /// In development a missing token leaves clear-all locked rather than
    /// open. Outside development a missing token fails startup.
    pub fn from_config(admin_token: Option<&str>, is_development: bool) -> anyhow::Result<Self> {
        let token = admin_token.map(str::trim).filter(|t| !t.is_empty());

        match token {
            Some(token) => Ok(Self::with_token(token)),
            None if is_development => {
                tracing::warn!("PINGMAP_ADMIN_TOKEN not set; clear-all is locked");
                Ok(Self { admin_token: None })
            }
            None => anyhow::bail!(
                "PINGMAP_ADMIN_TOKEN is required outside development; clear-all cannot be authorized without it"
            ),
        }
    }

    #[must_use]
    pub fn with_token(token: &str) -> Self {
        Self {
            admin_token: Some(Arc::from(token)),
        }
    }

    fn allows(&self, token: &str) -> bool {
        self.admin_token
            .as_deref()
            .is_some_and(|expected| bool::from(expected.as_bytes().ct_eq(token.as_bytes())))
    }
}

#[derive(Debug, Clone)]
struct RateLimitWindow {
    started_at: Instant,
    count: usize,
}

/// Fixed-window limiter shared by every client of the write routes.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    state: Arc<Mutex<RateLimitWindow>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Arc::new(Mutex::new(RateLimitWindow {
                started_at: Instant::now(),
                count: 0,
            })),
        }
    }
}

fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is:
/// - Inserted into request extensions as [`RequestId`]
/// - Set on the response as the `x-request-id` header
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Rejects requests without the admin bearer token before the handler runs.
pub async fn require_admin_token(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    let token = extract_bearer_token(req.headers().get(AUTHORIZATION));

    match token {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => {
            tracing::warn!("rejected clear-all without a valid admin token");
            ApiError::new(
                request_id_of(&req),
                "unauthorized",
                "missing or invalid bearer token",
            )
            .into_response()
        }
    }
}

/// Middleware enforcing a fixed request-per-window limit.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let mut window = rate_limit.state.lock().await;
    let elapsed = window.started_at.elapsed();

    if elapsed >= rate_limit.window {
        window.started_at = Instant::now();
        window.count = 0;
    }

    if window.count >= rate_limit.max_requests {
        drop(window);
        return ApiError::new(request_id_of(&req), "rate_limited", "rate limit exceeded")
            .into_response();
    }

    window.count += 1;
    drop(window);

    next.run(req).await
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_token_accepts_valid_header() {
        let header = HeaderValue::from_static("Bearer test-token");
        assert_eq!(extract_bearer_token(Some(&header)), Some("test-token"));
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_header() {
        let header = HeaderValue::from_static("Basic abc123");
        assert_eq!(extract_bearer_token(Some(&header)), None);
        let header = HeaderValue::from_static("Bearer   ");
        assert_eq!(extract_bearer_token(Some(&header)), None);
    }

    #[test]
    fn missing_token_locks_clear_all_in_development() {
        let state = AuthState::from_config(None, true).expect("dev should allow missing token");
        assert!(!state.allows(""));
        assert!(!state.allows("anything"));
    }

    #[test]
    fn missing_token_fails_outside_development() {
        assert!(AuthState::from_config(None, false).is_err());
        assert!(AuthState::from_config(Some("  "), false).is_err());
    }

    #[test]
    fn only_the_exact_token_is_allowed() {
        let state = AuthState::from_config(Some(" s3cret "), false).expect("token");
        assert!(state.allows("s3cret"));
        assert!(!state.allows("s3cre"));
        assert!(!state.allows("s3cret2"));
    }

    #[test]
    fn debug_redacts_token() {
        let state = AuthState::with_token("s3cret");
        assert!(!format!("{state:?}").contains("s3cret"));
    }
}
