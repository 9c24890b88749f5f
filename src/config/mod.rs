//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + EDGE_GATEWAY_* env overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → server swaps the hot-reloadable policy (access rules,
//!       rate limits, security headers) through arc-swap
//! ```
//!
//! Secrets, store, dependencies and routes are read once at startup.

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, CircuitBreakerConfig, CorsConfig, DependencyConfig, GatewayConfig, RateLimitConfig,
    RevocationFailMode, RouteConfig, SecurityConfig, StoreBackend,
};
