//! Response hardening and request size enforcement.
//!
//! Runs first in the chain so its response hook runs last and every
//! response, including rejections from later filters, carries the headers.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request};
use axum::response::Response;

use crate::config::SecurityConfig;
use crate::error::GatewayError;
use crate::http::chain::{Flow, RequestFilter};
use crate::http::request::RequestContext;
use crate::security::policy::PolicyHandle;

pub const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains; preload";
pub const PERMISSIONS_POLICY_VALUE: &str = "geolocation=(), microphone=(), camera=()";
pub const API_CACHE_CONTROL: &str = "no-store, no-cache, must-revalidate, private";

pub struct SecurityHeadersFilter {
    policy: PolicyHandle,
}

impl SecurityHeadersFilter {
    pub fn new(policy: PolicyHandle) -> Self {
        Self { policy }
    }
}

/// Declared body length, if present and numeric.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

pub fn apply_security_headers(headers: &mut HeaderMap, config: &SecurityConfig, path: &str, https: bool) {
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    match HeaderValue::from_str(&config.content_security_policy) {
        Ok(csp) => {
            headers.insert(header::CONTENT_SECURITY_POLICY, csp);
        }
        Err(_) => tracing::warn!("content security policy is not a valid header value, omitted"),
    }
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert("permissions-policy", HeaderValue::from_static(PERMISSIONS_POLICY_VALUE));

    if https {
        headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS_VALUE));
    }

    if path.contains("/api/") {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(API_CACHE_CONTROL));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }
}

#[async_trait]
impl RequestFilter for SecurityHeadersFilter {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    async fn on_request(&self, ctx: &mut RequestContext, request: &mut Request<Body>) -> Flow {
        let max = self.policy.load().security.max_body_size;
        match content_length(request.headers()) {
            Some(actual) if actual > max as u64 => {
                tracing::warn!(trace_id = %ctx.trace_id, path = %ctx.path, actual, max, "request body too large");
                Flow::Halt(ctx.reject(GatewayError::PayloadTooLarge { actual, max }))
            }
            _ => Flow::Continue,
        }
    }

    fn on_response(&self, ctx: &RequestContext, response: &mut Response) {
        let policy = self.policy.load();
        if policy.security.enable_headers {
            apply_security_headers(response.headers_mut(), &policy.security, &ctx.path, ctx.https);
        }
    }
}
