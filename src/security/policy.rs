//! Hot-reloadable request policy.
//!
//! Access rules, rate-limit settings and response hardening are read by the
//! filters on every request through one `ArcSwap`, so a reload is a single
//! pointer swap and in-flight requests keep the snapshot they started with.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{GatewayConfig, RateLimitConfig, SecurityConfig};
use crate::security::access_control::AccessRules;

#[derive(Debug, Clone)]
pub struct EdgePolicy {
    pub access: AccessRules,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
}

pub type PolicyHandle = Arc<ArcSwap<EdgePolicy>>;

impl EdgePolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            access: AccessRules::from_config(&config.auth),
            rate_limit: config.rate_limit.clone(),
            security: config.security.clone(),
        }
    }

    pub fn handle(config: &GatewayConfig) -> PolicyHandle {
        Arc::new(ArcSwap::from_pointee(Self::from_config(config)))
    }
}

/// Swap in the policy from a reloaded config.
///
/// Sections that are only read at startup are compared and reported; they
/// take effect after a restart.
pub fn apply_reload(handle: &PolicyHandle, current: &GatewayConfig, next: &GatewayConfig) {
    let restart_only = [
        ("listener", current.listener != next.listener),
        ("timeouts", current.timeouts != next.timeouts),
        ("store", current.store != next.store),
        ("dependencies", current.dependencies != next.dependencies),
        ("routes", current.routes != next.routes),
        ("circuit_breaker", current.circuit_breaker != next.circuit_breaker),
        ("observability", current.observability != next.observability),
        ("cors", current.cors != next.cors),
        (
            "auth.secret",
            current.auth.secret != next.auth.secret
                || current.auth.access_token_ttl_secs != next.auth.access_token_ttl_secs
                || current.auth.refresh_token_ttl_secs != next.auth.refresh_token_ttl_secs,
        ),
    ];
    for (section, changed) in restart_only {
        if changed {
            tracing::warn!(section, "config section changed on disk; restart required to apply");
        }
    }

    handle.store(Arc::new(EdgePolicy::from_config(next)));
    tracing::info!(
        public_paths = next.auth.public_paths.len(),
        optional_auth_paths = next.auth.optional_auth_paths.len(),
        rate_limit = next.rate_limit.default_limit,
        "policy reloaded"
    );
}
