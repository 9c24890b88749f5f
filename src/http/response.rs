//! Response bodies owned by the gateway.
//!
//! Errors use one uniform shape; gateway-owned endpoints (logout, refresh)
//! wrap their payload in the success envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{timestamp, status, error, message, path, traceId, details?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(
        status: StatusCode,
        message: impl Into<String>,
        path: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
            path: path.into(),
            trace_id: trace_id.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// `{success, message, data, traceId, timestamp}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T, trace_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            trace_id: trace_id.into(),
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_camel_case_without_empty_details() {
        let body = ErrorBody::new(StatusCode::PAYLOAD_TOO_LARGE, "too big", "/upload", "abc");
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["error"], "Payload Too Large");
        assert_eq!(value["traceId"], "abc");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn envelope_carries_data_and_trace() {
        let envelope = ApiResponse::ok("Logout successful", "Logged out successfully", "t-1");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], "Logged out successfully");
        assert_eq!(value["traceId"], "t-1");
    }
}
