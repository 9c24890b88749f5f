//! Gateway error types.
//!
//! Every client-visible failure is rendered through [`GatewayError`] into the
//! uniform error body. Messages returned to clients are generic; the specific
//! cause is logged server-side with the request's trace id.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::http::response::ErrorBody;

/// Why a credential was refused. Always 401 to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token revoked")]
    Revoked,
    #[error("wrong token type")]
    WrongType,
}

impl AuthError {
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "Missing or invalid token",
            AuthError::Revoked => "Token has been revoked",
            AuthError::WrongType => "Invalid token type",
            AuthError::Malformed | AuthError::Expired | AuthError::BadSignature => {
                "Invalid or expired token"
            }
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::Malformed => "malformed",
            AuthError::Expired => "expired",
            AuthError::BadSignature => "bad_signature",
            AuthError::Revoked => "revoked",
            AuthError::WrongType => "wrong_type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("rate limit of {limit} per {window_secs}s exceeded")]
    LimitExceeded { limit: u64, window_secs: u64 },
}

impl QuotaError {
    /// Human-readable limit, e.g. "300/min".
    pub fn limit_detail(&self) -> String {
        let QuotaError::LimitExceeded { limit, window_secs } = self;
        if *window_secs == 60 {
            format!("{limit}/min")
        } else {
            format!("{limit}/{window_secs}s")
        }
    }
}

/// Failure talking to a downstream dependency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("responded with status {status}")]
    NonSuccessStatus { status: u16 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("circuit breaker is open")]
    CircuitOpen,
}

/// Failure talking to the shared key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("store task interrupted")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error(transparent)]
    RateLimited(#[from] QuotaError),

    #[error("payload too large ({actual} > {max} bytes)")]
    PayloadTooLarge { actual: u64, max: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("upstream failure: {0}")]
    Upstream(DependencyError),

    #[error("request not completed within {}ms", .0.as_millis())]
    RequestTimeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(DependencyError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream(DependencyError::CircuitOpen) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            GatewayError::Unauthorized(e) => e.client_message().to_string(),
            GatewayError::RateLimited(_) => "Rate limit exceeded".to_string(),
            GatewayError::PayloadTooLarge { .. } => {
                "Request body exceeds the maximum allowed size".to_string()
            }
            GatewayError::BadRequest(reason) | GatewayError::NotFound(reason) => reason.clone(),
            GatewayError::ServiceUnavailable(_) | GatewayError::Upstream(DependencyError::CircuitOpen) => {
                "Service temporarily unavailable".to_string()
            }
            GatewayError::Upstream(DependencyError::Timeout(_)) => {
                "Upstream service timed out".to_string()
            }
            GatewayError::Upstream(_) => "Upstream service unavailable".to_string(),
            GatewayError::RequestTimeout(_) => "Request timed out".to_string(),
            GatewayError::Internal(_) => "An unexpected error occurred".to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::RateLimited(quota) => Some(json!({ "limit": quota.limit_detail() })),
            GatewayError::PayloadTooLarge { max, .. } => Some(json!({ "maxBytes": max })),
            _ => None,
        }
    }

    fn log(&self, path: &str, trace_id: &str) {
        match self {
            GatewayError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "gateway.availability", %trace_id, %path, reason = %reason, "service unavailable");
            }
            GatewayError::Upstream(err) => {
                tracing::warn!(target: "gateway.upstream", %trace_id, %path, error = %err, "upstream call failed");
            }
            GatewayError::RequestTimeout(limit) => {
                tracing::warn!(target: "gateway.availability", %trace_id, %path, limit_ms = limit.as_millis() as u64, "request timed out");
            }
            GatewayError::Internal(err) => {
                tracing::error!(target: "gateway.internal", %trace_id, %path, error = %err, "unexpected error");
            }
            _ => {}
        }
    }

    /// Bind this error to the request it ended, producing a renderable reply.
    pub fn at(self, path: impl Into<String>, trace_id: impl Into<String>) -> ErrorReply {
        ErrorReply {
            error: self,
            path: path.into(),
            trace_id: trace_id.into(),
        }
    }
}

/// A [`GatewayError`] together with the request path and trace id.
#[derive(Debug)]
pub struct ErrorReply {
    pub error: GatewayError,
    pub path: String,
    pub trace_id: String,
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let ErrorReply {
            error,
            path,
            trace_id,
        } = self;
        error.log(&path, &trace_id);

        let status = error.status_code();
        let body = ErrorBody::new(status, error.client_message(), path, trace_id)
            .with_details(error.details());
        let mut response = body.into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"edge-gateway\", error=\"invalid_token\""),
            );
        }

        response
    }
}
