//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → chain.rs (ordered RequestFilters over one RequestContext)
//!         SecurityHeaders → AccessLog → AuthDecision → TrafficControl
//!     → gateway-owned handler (health, auth) or forwarder
//!     → filters' response hooks in reverse
//!     → Send to client
//! ```

use std::time::Duration;

use axum::body::Body;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

pub mod access_log;
pub mod chain;
pub mod request;
pub mod response;
pub mod server;

pub use chain::{filter_chain_middleware, FilterChain, Flow, RequestFilter};
pub use request::RequestContext;
pub use server::{AppState, HttpServer};

pub const GATEWAY_HEADER: &str = "x-gateway";
pub const GATEWAY_ID: &str = "edge-gateway";
pub const X_TRACE_ID: &str = "x-trace-id";

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_EMAIL: &str = "x-user-email";
pub const X_USER_ROLE: &str = "x-user-role";
pub const X_USER_TYPE: &str = "x-user-type";
pub const X_HAS_VALID_TOKEN: &str = "x-has-valid-token";

/// Identity headers the gateway owns. Inbound copies are always discarded.
pub const IDENTITY_HEADERS: [&str; 5] = [
    X_USER_ID,
    X_USER_EMAIL,
    X_USER_ROLE,
    X_USER_TYPE,
    X_HAS_VALID_TOKEN,
];

/// Client used for forwarding, member lookups and health probes.
pub type UpstreamClient = Client<HttpConnector, Body>;

pub fn upstream_client(connect_timeout: Duration) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}
