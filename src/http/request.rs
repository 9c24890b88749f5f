//! Per-request context.
//!
//! Built once when a request enters the filter chain and inserted as a
//! request extension before the handler runs. Carries the correlation id,
//! the derived client address, the auth decision and the quota status.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::security::access_control::AuthState;
use crate::security::rate_limit::QuotaStatus;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub method: Method,
    pub path: String,
    /// Address used for rate limiting and logs.
    pub client_ip: Option<IpAddr>,
    /// Socket peer, appended to `X-Forwarded-For` downstream.
    pub peer_ip: Option<IpAddr>,
    pub https: bool,
    pub auth: AuthState,
    pub quota: Option<QuotaStatus>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn from_request(
        request: &Request<Body>,
        peer: Option<SocketAddr>,
        trust_forwarded: bool,
    ) -> Self {
        let headers = request.headers();
        let peer_ip = peer.map(|addr| addr.ip());
        let https = request.uri().scheme_str() == Some("https")
            || (trust_forwarded
                && headers
                    .get("x-forwarded-proto")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|proto| proto.eq_ignore_ascii_case("https")));

        Self {
            trace_id: Uuid::new_v4().to_string(),
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            client_ip: client_ip(headers, peer_ip, trust_forwarded),
            peer_ip,
            https,
            auth: AuthState::default(),
            quota: None,
            started_at: Instant::now(),
        }
    }

    /// Render `err` as the uniform error body for this request.
    pub fn reject(&self, err: impl Into<GatewayError>) -> Response {
        err.into().at(&self.path, &self.trace_id).into_response()
    }
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
/// Forwarded headers are ignored unless trusted.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        if real.is_some() {
            return real;
        }
    }
    peer
}
