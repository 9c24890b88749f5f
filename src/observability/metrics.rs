//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_auth_decisions_total` (counter): decisions by outcome
//! - `gateway_rate_limited_total` (counter): 429s by scope kind
//! - `gateway_store_errors_total` (counter): store failures by operation
//! - `gateway_breaker_transitions_total` (counter): by dependency, new state
//! - `gateway_dependency_up` (gauge): 1 = UP, 0 otherwise
//!
//! Labels are bounded: no paths, subjects or addresses.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )?
        .install()?;
    tracing::info!(address = %addr, "metrics endpoint listening");
    Ok(())
}

/// Standard methods keep their name; extension methods share one label.
pub fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "PATCH" => "PATCH",
        "DELETE" => "DELETE",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        "CONNECT" => "CONNECT",
        "TRACE" => "TRACE",
        _ => "OTHER",
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method_label(method);
    let status = status.to_string();
    counter!("gateway_requests_total", "method" => method, "status" => status.clone())
        .increment(1);
    histogram!("gateway_request_duration_seconds", "method" => method, "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_auth_decision(outcome: &'static str) {
    counter!("gateway_auth_decisions_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limited(scope_kind: &'static str) {
    counter!("gateway_rate_limited_total", "scope" => scope_kind).increment(1);
}

pub fn record_store_error(operation: &'static str) {
    counter!("gateway_store_errors_total", "operation" => operation).increment(1);
}

pub fn record_breaker_transition(dependency: &str, to: CircuitState) {
    counter!(
        "gateway_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "state" => to.as_str()
    )
    .increment(1);
}

pub fn record_dependency_up(dependency: &str, up: bool) {
    gauge!("gateway_dependency_up", "dependency" => dependency.to_string())
        .set(if up { 1.0 } else { 0.0 });
}
