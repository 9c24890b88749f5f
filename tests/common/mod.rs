//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Timelike, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use edge_gateway::auth::TokenCodec;
use edge_gateway::config::schema::{StoreBackend, MEMBER_SERVICE};
use edge_gateway::config::GatewayConfig;
use edge_gateway::http::AppState;
use edge_gateway::store::MemoryStore;
use edge_gateway::{HttpServer, Shutdown};

pub const SECRET: &str = "integration-secret-integration-secret";

#[derive(Clone)]
struct MockState {
    hits: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    delay: Duration,
}

/// A downstream service: echoes what it received, answers health probes
/// and serves `m1` from the member endpoint.
pub struct MockDependency {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub healthy: Arc<AtomicBool>,
}

impl MockDependency {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(State(state): State<MockState>, request: Request) -> Json<Value> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let headers: BTreeMap<String, String> = request
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    Json(json!({ "path": request.uri().path(), "headers": headers }))
}

async fn health(State(state): State<MockState>) -> Response {
    if state.healthy.load(Ordering::SeqCst) {
        Json(json!({ "status": "UP" })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "DOWN" }))).into_response()
    }
}

async fn member(Path(id): Path<String>) -> Response {
    if id == "m1" {
        Json(json!({
            "success": true,
            "message": "Member retrieved",
            "data": { "memberId": "m1", "email": "m1@example.com", "name": "Member One", "role": "USER" }
        }))
        .into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "success": false }))).into_response()
    }
}

pub async fn start_dependency() -> MockDependency {
    start_dependency_with_delay(Duration::ZERO).await
}

pub async fn start_dependency_with_delay(delay: Duration) -> MockDependency {
    let state = MockState {
        hits: Arc::new(AtomicUsize::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
        delay,
    };
    let app = Router::new()
        .route("/actuator/health", get(health))
        .route("/api/v1/members/{id}", get(member))
        .fallback(echo)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockDependency {
        addr,
        hits: state.hits,
        healthy: state.healthy,
    }
}

/// Defaults with every dependency pointed at a mock, in-memory store, no
/// background monitor and no metrics listener.
pub fn test_config(member: &MockDependency, product: &MockDependency, cart: &MockDependency) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.secret = SECRET.to_string();
    config.store.backend = StoreBackend::Memory;
    config.health.monitor_interval_secs = 0;
    config.observability.metrics_enabled = false;
    config.circuit_breaker.call_timeout_ms = 1000;
    for dependency in config.dependencies.iter_mut() {
        dependency.base_url = match dependency.name.as_str() {
            MEMBER_SERVICE => member.base_url(),
            "productService" => product.base_url(),
            _ => cart.base_url(),
        };
    }
    config
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(
        SECRET.as_bytes(),
        Duration::from_secs(900),
        Duration::from_secs(7 * 24 * 3600),
    )
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: MemoryStore,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let store = MemoryStore::new();
    let server = HttpServer::new(config, Arc::new(store.clone()));
    let state = server.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, None, &server_shutdown).await;
    });

    TestGateway {
        addr,
        state,
        store,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Avoid straddling a fixed rate-limit window boundary mid-test.
pub async fn wait_for_fresh_minute() {
    let second = Utc::now().second();
    if second >= 50 {
        tokio::time::sleep(Duration::from_secs(u64::from(61 - second))).await;
    }
}
