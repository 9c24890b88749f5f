//! Edge authentication gateway library.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod store;

pub use config::schema::GatewayConfig;
pub use error::{AuthError, GatewayError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
