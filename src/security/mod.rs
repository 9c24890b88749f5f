//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (outside the chain; preflights never reach authentication)
//!     → headers.rs (body size check; hardening headers on the way out)
//!     → access_control.rs (public / optional / protected, identity headers)
//!     → rate_limit.rs (fixed-window counter per user, address or global)
//!     → Pass to handler or forwarder
//! ```
//!
//! policy.rs holds the reloadable settings all three filters read.

pub mod access_control;
pub mod cors;
pub mod headers;
pub mod policy;
pub mod rate_limit;

pub use access_control::{AccessRules, AuthDecisionFilter, AuthState, Principal};
pub use cors::cors_layer;
pub use headers::SecurityHeadersFilter;
pub use policy::{EdgePolicy, PolicyHandle};
pub use rate_limit::{QuotaStatus, RateLimiter, RateScope, TrafficControlFilter};
