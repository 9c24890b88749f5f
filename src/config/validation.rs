//! Configuration validation.
//!
//! Returns every problem found, not just the first. Runs before a config is
//! accepted, both at startup and on hot reload.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{CircuitBreakerConfig, GatewayConfig};
use crate::routing::matcher::PathPattern;

/// Minimum HS256 key length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "not a socket address",
        ));
    }

    if config.auth.secret.len() < MIN_SECRET_LEN {
        errors.push(ValidationError::new(
            "auth.secret",
            format!("must be at least {MIN_SECRET_LEN} bytes"),
        ));
    }
    if config.auth.access_token_ttl_secs == 0 {
        errors.push(ValidationError::new("auth.access_token_ttl_secs", "must be > 0"));
    }
    if config.auth.refresh_token_ttl_secs <= config.auth.access_token_ttl_secs {
        errors.push(ValidationError::new(
            "auth.refresh_token_ttl_secs",
            "must exceed the access token lifetime",
        ));
    }
    if config.auth.default_revocation_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "auth.default_revocation_ttl_secs",
            "must be > 0",
        ));
    }
    for (field, patterns) in [
        ("auth.public_paths", &config.auth.public_paths),
        ("auth.optional_auth_paths", &config.auth.optional_auth_paths),
    ] {
        for pattern in patterns {
            if let Err(e) = PathPattern::parse(pattern) {
                errors.push(ValidationError::new(field, e.to_string()));
            }
        }
    }

    if config.rate_limit.default_limit == 0 {
        errors.push(ValidationError::new("rate_limit.default_limit", "must be > 0"));
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be > 0"));
    }

    if config.store.command_timeout_ms == 0 {
        errors.push(ValidationError::new("store.command_timeout_ms", "must be > 0"));
    }

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    let mut names = HashSet::new();
    for dep in &config.dependencies {
        if !names.insert(dep.name.as_str()) {
            errors.push(ValidationError::new(
                "dependencies",
                format!("duplicate dependency '{}'", dep.name),
            ));
        }
        if url::Url::parse(&dep.base_url).is_err() {
            errors.push(ValidationError::new(
                format!("dependencies.{}.base_url", dep.name),
                "not a valid URL",
            ));
        }
        if !dep.health_path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("dependencies.{}.health_path", dep.name),
                "must start with '/'",
            ));
        }
        if let Some(breaker) = &dep.circuit_breaker {
            check_breaker(
                &format!("dependencies.{}.circuit_breaker", dep.name),
                breaker,
                &mut errors,
            );
        }
    }

    for route in &config.routes {
        if let Err(e) = PathPattern::parse(&route.pattern) {
            errors.push(ValidationError::new("routes.pattern", e.to_string()));
        }
        if !names.contains(route.dependency.as_str()) {
            errors.push(ValidationError::new(
                "routes.dependency",
                format!("unknown dependency '{}'", route.dependency),
            ));
        }
    }

    check_cors(config, &mut errors);

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_cors(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let cors = &config.cors;
    if !cors.enabled {
        return;
    }
    let lists = [
        ("cors.allowed_origins", &cors.allowed_origins),
        ("cors.allowed_methods", &cors.allowed_methods),
        ("cors.allowed_headers", &cors.allowed_headers),
        ("cors.exposed_headers", &cors.exposed_headers),
    ];
    for (field, values) in lists {
        if cors.allow_credentials && values.iter().any(|v| v == "*") {
            errors.push(ValidationError::new(field, "'*' cannot be used with allow_credentials"));
        }
    }
    for origin in &cors.allowed_origins {
        if origin != "*" && url::Url::parse(origin).is_err() {
            errors.push(ValidationError::new(
                "cors.allowed_origins",
                format!("'{origin}' is not an origin"),
            ));
        }
    }
    for method in &cors.allowed_methods {
        if method != "*" && method.parse::<axum::http::Method>().is_err() {
            errors.push(ValidationError::new(
                "cors.allowed_methods",
                format!("'{method}' is not an HTTP method"),
            ));
        }
    }
}

fn check_breaker(field: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 100.0) {
        errors.push(ValidationError::new(
            format!("{field}.failure_rate_threshold"),
            "must be in (0, 100]",
        ));
    }
    if breaker.sliding_window_size == 0 {
        errors.push(ValidationError::new(
            format!("{field}.sliding_window_size"),
            "must be > 0",
        ));
    }
    if breaker.minimum_calls == 0 || breaker.minimum_calls > breaker.sliding_window_size {
        errors.push(ValidationError::new(
            format!("{field}.minimum_calls"),
            "must be between 1 and sliding_window_size",
        ));
    }
    if breaker.permitted_calls_in_half_open == 0 {
        errors.push(ValidationError::new(
            format!("{field}.permitted_calls_in_half_open"),
            "must be > 0",
        ));
    }
    if breaker.call_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{field}.call_timeout_ms"),
            "must be > 0",
        ));
    }
}
