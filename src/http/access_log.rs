//! Request logging filter.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

use crate::http::chain::{Flow, RequestFilter};
use crate::http::request::RequestContext;
use crate::observability::metrics;

pub struct AccessLogFilter;

#[async_trait]
impl RequestFilter for AccessLogFilter {
    fn name(&self) -> &'static str {
        "access_log"
    }

    async fn on_request(&self, ctx: &mut RequestContext, _request: &mut Request<Body>) -> Flow {
        tracing::info!(
            target: "gateway.access",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
            client_ip = ?ctx.client_ip,
            "incoming request"
        );
        Flow::Continue
    }

    fn on_response(&self, ctx: &RequestContext, response: &mut Response) {
        let status = response.status().as_u16();
        tracing::info!(
            target: "gateway.access",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
            status,
            auth = ctx.auth.label(),
            duration_ms = ctx.started_at.elapsed().as_millis() as u64,
            "request completed"
        );
        metrics::record_request(ctx.method.as_str(), status, ctx.started_at);
    }
}
