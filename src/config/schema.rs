//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the edge gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Credential issuing and access rules.
    pub auth: AuthConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Shared key-value store used for revocation and rate counters.
    pub store: StoreConfig,

    /// Breaker defaults applied to every dependency without an override.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Downstream services probed for health and used as forwarding targets.
    pub dependencies: Vec<DependencyConfig>,

    /// Forwarding table, first match wins.
    pub routes: Vec<RouteConfig>,

    /// Response hardening and body limits.
    pub security: SecurityConfig,

    /// Cross-origin access for browser clients.
    pub cors: CorsConfig,

    /// Health reporting settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            store: StoreConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            dependencies: default_dependencies(),
            routes: default_routes(),
            security: SecurityConfig::default(),
            cors: CorsConfig::default(),
            health: HealthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Service name reported by `/health`.
    pub service_name: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            service_name: "edge-gateway".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Upper bound on a single forwarded call in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            upstream_secs: 25,
        }
    }
}

/// What to do when the denylist cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RevocationFailMode {
    /// Proceed as if the token were not revoked.
    #[default]
    Open,
    /// Refuse protected requests with 503.
    Closed,
}

/// Credential and access-rule configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret. Must be at least 32 bytes.
    pub secret: String,

    /// Access token lifetime in seconds.
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_token_ttl_secs: u64,

    /// Paths served without any credential check.
    pub public_paths: Vec<String>,

    /// Paths served to both guests and authenticated callers.
    pub optional_auth_paths: Vec<String>,

    /// Policy when the revocation store errors.
    pub revocation_fail_mode: RevocationFailMode,

    /// Denylist TTL used when a token's expiry cannot be read.
    pub default_revocation_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            public_paths: vec![
                "/api/v1/auth/login".to_string(),
                "/api/v1/auth/register".to_string(),
                "/api/v1/auth/refresh".to_string(),
                "/api/v1/products/**".to_string(),
                "/health".to_string(),
                "/health/**".to_string(),
            ],
            optional_auth_paths: vec!["/api/v1/cart/**".to_string()],
            revocation_fail_mode: RevocationFailMode::Open,
            default_revocation_ttl_secs: 3600,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"[REDACTED]")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("public_paths", &self.public_paths)
            .field("optional_auth_paths", &self.optional_auth_paths)
            .field("revocation_fail_mode", &self.revocation_fail_mode)
            .field("default_revocation_ttl_secs", &self.default_revocation_ttl_secs)
            .finish()
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per window.
    pub default_limit: u64,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Count authenticated callers by subject.
    pub per_user: bool,

    /// Count anonymous callers by client IP.
    pub per_ip: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: 300,
            window_secs: 60,
            per_user: true,
            per_ip: false,
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance; required when several gateways run.
    #[default]
    Redis,
    /// Process-local map; single instance only.
    Memory,
}

/// Shared key-value store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend to use.
    pub backend: StoreBackend,

    /// Redis connection URL.
    pub url: String,

    /// Per-command timeout in milliseconds.
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            command_timeout_ms: 500,
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100] at which a closed breaker opens.
    pub failure_rate_threshold: f64,

    /// Number of most recent outcomes considered.
    pub sliding_window_size: usize,

    /// Outcomes required before the failure rate is evaluated.
    pub minimum_calls: usize,

    /// Seconds an open breaker waits before allowing trials.
    pub open_cooldown_secs: u64,

    /// Trial calls admitted while half-open.
    pub permitted_calls_in_half_open: usize,

    /// Deadline for a single guarded call in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_calls: 5,
            open_cooldown_secs: 30,
            permitted_calls_in_half_open: 3,
            call_timeout_ms: 3000,
        }
    }
}

/// A downstream service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DependencyConfig {
    /// Unique name, also the breaker key (e.g. "memberService").
    pub name: String,

    /// Base URL (e.g. "http://127.0.0.1:8081").
    pub base_url: String,

    /// Path probed for health.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Breaker settings replacing the defaults for this dependency.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

fn default_health_path() -> String {
    "/actuator/health".to_string()
}

/// Name of the dependency that resolves members during token refresh.
pub const MEMBER_SERVICE: &str = "memberService";

fn default_dependencies() -> Vec<DependencyConfig> {
    [
        (MEMBER_SERVICE, "http://127.0.0.1:8081"),
        ("productService", "http://127.0.0.1:8082"),
        ("cartService", "http://127.0.0.1:8083"),
    ]
    .into_iter()
    .map(|(name, base_url)| DependencyConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        health_path: default_health_path(),
        circuit_breaker: None,
    })
    .collect()
}

/// Route mapping a path pattern onto a dependency.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Path pattern, exact or ending in `/**`.
    pub pattern: String,

    /// Dependency name to forward to.
    pub dependency: String,
}

fn default_routes() -> Vec<RouteConfig> {
    [
        ("/api/v1/members/**", MEMBER_SERVICE),
        ("/api/v1/internal/products/**", "productService"),
        ("/api/v1/products/**", "productService"),
        ("/api/v1/cart/**", "cartService"),
    ]
    .into_iter()
    .map(|(pattern, dependency)| RouteConfig {
        pattern: pattern.to_string(),
        dependency: dependency.to_string(),
    })
    .collect()
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,

    /// Maximum body size in bytes.
    pub max_body_size: usize,

    /// Content-Security-Policy value.
    pub content_security_policy: String,

    /// Honour X-Forwarded-For / X-Real-IP / X-Forwarded-Proto.
    pub trust_forwarded_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 10 * 1024 * 1024, // 10MB
            content_security_policy:
                "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'"
                    .to_string(),
            trust_forwarded_headers: true,
        }
    }
}

/// CORS configuration. `"*"` in a list means any value; it cannot be
/// combined with `allow_credentials`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    /// Answer preflights and add CORS headers.
    pub enabled: bool,

    pub allowed_origins: Vec<String>,

    pub allowed_methods: Vec<String>,

    pub allowed_headers: Vec<String>,

    /// Response headers readable by browser scripts.
    pub exposed_headers: Vec<String>,

    pub allow_credentials: bool,

    /// How long a preflight answer may be cached, in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            enabled: true,
            allowed_origins: strings(&["http://localhost:3000"]),
            allowed_methods: strings(&["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]),
            allowed_headers: strings(&["Authorization", "Content-Type", "Accept", "X-Requested-With"]),
            exposed_headers: strings(&[
                "X-Trace-Id",
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
            ]),
            allow_credentials: true,
            max_age_secs: 3600,
        }
    }
}

/// Health reporting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Background probe interval in seconds, 0 disables the monitor.
    pub monitor_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Breaker settings for a dependency, falling back to the defaults.
    pub fn breaker_for(&self, dependency: &DependencyConfig) -> CircuitBreakerConfig {
        dependency
            .circuit_breaker
            .clone()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyConfig> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}
