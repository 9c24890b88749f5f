//! Ordered request filter chain.
//!
//! One axum middleware drives an explicit `Vec` of filters over a single
//! mutable [`RequestContext`]. A filter either lets the request continue or
//! halts it with a response. Response hooks run in reverse for every filter
//! whose request hook ran, including the one that halted.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::FutureExt;

use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::http::X_TRACE_ID;
use crate::security::policy::PolicyHandle;

pub enum Flow {
    Continue,
    Halt(Response),
}

#[async_trait]
pub trait RequestFilter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, ctx: &mut RequestContext, request: &mut Request<Body>) -> Flow;

    fn on_response(&self, _ctx: &RequestContext, _response: &mut Response) {}
}

#[derive(Clone)]
pub struct FilterChain {
    filters: Arc<Vec<Arc<dyn RequestFilter>>>,
    policy: PolicyHandle,
    request_timeout: Option<Duration>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn RequestFilter>>, policy: PolicyHandle) -> Self {
        Self {
            filters: Arc::new(filters),
            policy,
            request_timeout: None,
        }
    }

    /// Bound the time spent in the handler. An overrun is answered with the
    /// uniform 408 body and still passes through the response hooks.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    fn finish(&self, ctx: &RequestContext, response: &mut Response, ran: usize) {
        for filter in self.filters[..ran].iter().rev() {
            filter.on_response(ctx, response);
        }
        if let Ok(value) = HeaderValue::from_str(&ctx.trace_id) {
            response.headers_mut().insert(X_TRACE_ID, value);
        }
    }
}

pub async fn filter_chain_middleware(
    State(chain): State<FilterChain>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let trust_forwarded = chain.policy.load().security.trust_forwarded_headers;
    let mut ctx = RequestContext::from_request(&request, peer, trust_forwarded);

    // Inbound correlation headers are replaced by ours.
    if let Ok(value) = HeaderValue::from_str(&ctx.trace_id) {
        request.headers_mut().insert(X_TRACE_ID, value);
    }

    let mut ran = 0;
    for filter in chain.filters.iter() {
        ran += 1;
        if let Flow::Halt(mut response) = filter.on_request(&mut ctx, &mut request).await {
            tracing::debug!(trace_id = %ctx.trace_id, filter = filter.name(), status = response.status().as_u16(), "request halted");
            chain.finish(&ctx, &mut response, ran);
            return response;
        }
    }

    request.extensions_mut().insert(ctx.clone());
    let handled = AssertUnwindSafe(next.run(request)).catch_unwind();
    let outcome = match chain.request_timeout {
        Some(limit) => tokio::time::timeout(limit, handled)
            .await
            .map_err(|_| GatewayError::RequestTimeout(limit)),
        None => Ok(handled.await),
    };

    let mut response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(payload)) => ctx.reject(GatewayError::Internal(format!(
            "handler panicked: {}",
            panic_detail(payload.as_ref())
        ))),
        Err(err) => ctx.reject(err),
    };
    chain.finish(&ctx, &mut response, ran);
    response
}

pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload")
}
