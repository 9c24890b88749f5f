//! Fixed-window rate limiting over the shared store.
//!
//! Each (scope, window) pair is one counter: `INCR`, and on the first hit
//! `EXPIRE` for the window length. Every gateway instance increments the
//! same key, so the limit holds across the fleet. Store failures let the
//! request through.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::response::Response;

use crate::auth::token::now_unix;
use crate::config::RateLimitConfig;
use crate::error::QuotaError;
use crate::http::chain::{Flow, RequestFilter};
use crate::http::request::RequestContext;
use crate::observability::metrics;
use crate::security::access_control::Principal;
use crate::security::policy::PolicyHandle;
use crate::store::{self, KvStore};

pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateScope {
    User(String),
    Ip(IpAddr),
    Global,
}

impl RateScope {
    /// Subject when counting per user and authenticated, else the client
    /// address when either per-user or per-ip counting is on, else global.
    pub fn select(config: &RateLimitConfig, principal: Option<&Principal>, ip: Option<IpAddr>) -> Self {
        if config.per_user {
            if let Some(principal) = principal {
                return RateScope::User(principal.subject.clone());
            }
        }
        if config.per_user || config.per_ip {
            if let Some(ip) = ip {
                return RateScope::Ip(ip);
            }
        }
        RateScope::Global
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RateScope::User(_) => "user",
            RateScope::Ip(_) => "ip",
            RateScope::Global => "global",
        }
    }

    pub fn key(&self, window: u64) -> String {
        match self {
            RateScope::User(subject) => format!("{RATE_LIMIT_PREFIX}user:{subject}:{window}"),
            RateScope::Ip(ip) => format!("{RATE_LIMIT_PREFIX}ip:{ip}:{window}"),
            RateScope::Global => format!("{RATE_LIMIT_PREFIX}global:{window}"),
        }
    }
}

/// Outcome of one counted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit: u64,
    pub window_secs: u64,
    pub count: u64,
    pub remaining: u64,
    /// Unix second at which the current window ends.
    pub reset_at: u64,
}

impl QuotaStatus {
    pub fn exceeded(&self) -> bool {
        self.count > self.limit
    }

    pub fn error(&self) -> QuotaError {
        QuotaError::LimitExceeded {
            limit: self.limit,
            window_secs: self.window_secs,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, scope: &RateScope, limit: u64, window_secs: u64) -> Option<QuotaStatus> {
        self.check_at(scope, limit, window_secs, now_unix().max(0) as u64).await
    }

    /// Count one request in the window containing `now_unix`.
    ///
    /// `None` when the store could not be reached; the caller lets the
    /// request through.
    pub async fn check_at(
        &self,
        scope: &RateScope,
        limit: u64,
        window_secs: u64,
        now_unix: u64,
    ) -> Option<QuotaStatus> {
        let window_secs = window_secs.max(1);
        let window = now_unix / window_secs;
        let key = scope.key(window);
        let ttl = Duration::from_secs(window_secs);
        let kv = Arc::clone(&self.store);

        // Runs to completion even if the request is dropped.
        let counted = store::detached(async move { kv.increment_within(&key, ttl).await }).await;

        match counted {
            Ok(count) => {
                let count = count.max(0) as u64;
                Some(QuotaStatus {
                    limit,
                    window_secs,
                    count,
                    remaining: limit.saturating_sub(count),
                    reset_at: (window + 1) * window_secs,
                })
            }
            Err(err) => {
                metrics::record_store_error("rate_limit");
                tracing::warn!(target: "gateway.rate_limit", scope = scope.kind(), error = %err, "rate limit store unavailable, allowing request");
                None
            }
        }
    }
}

pub struct TrafficControlFilter {
    limiter: RateLimiter,
    policy: PolicyHandle,
}

impl TrafficControlFilter {
    pub fn new(limiter: RateLimiter, policy: PolicyHandle) -> Self {
        Self { limiter, policy }
    }
}

#[async_trait]
impl RequestFilter for TrafficControlFilter {
    fn name(&self) -> &'static str {
        "traffic_control"
    }

    async fn on_request(&self, ctx: &mut RequestContext, _request: &mut Request<Body>) -> Flow {
        let config = self.policy.load().rate_limit.clone();
        if !config.enabled {
            return Flow::Continue;
        }

        let scope = RateScope::select(&config, ctx.auth.principal(), ctx.client_ip);
        ctx.quota = self
            .limiter
            .check(&scope, config.default_limit, config.window_secs)
            .await;

        match ctx.quota {
            Some(status) if status.exceeded() => {
                metrics::record_rate_limited(scope.kind());
                tracing::warn!(
                    target: "gateway.rate_limit",
                    trace_id = %ctx.trace_id,
                    path = %ctx.path,
                    scope = scope.kind(),
                    count = status.count,
                    limit = status.limit,
                    "rate limit exceeded"
                );
                Flow::Halt(ctx.reject(status.error()))
            }
            _ => Flow::Continue,
        }
    }

    fn on_response(&self, ctx: &RequestContext, response: &mut Response) {
        let Some(status) = ctx.quota else {
            return;
        };
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_at));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};

    fn limiter() -> (RateLimiter, MemoryStore) {
        let store = MemoryStore::new();
        (RateLimiter::new(Arc::new(store.clone())), store)
    }

    fn principal(subject: &str) -> Principal {
        Principal {
            subject: subject.into(),
            email: String::new(),
            role: "USER".into(),
        }
    }

    #[test]
    fn scope_selection() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let m1 = principal("m1");
        let per_user = RateLimitConfig::default();
        assert_eq!(RateScope::select(&per_user, Some(&m1), Some(ip)), RateScope::User("m1".into()));
        // Guests and anonymous callers count by address.
        assert_eq!(RateScope::select(&per_user, None, Some(ip)), RateScope::Ip(ip));
        assert_eq!(RateScope::select(&per_user, None, None), RateScope::Global);

        let off = RateLimitConfig {
            per_user: false,
            per_ip: false,
            ..RateLimitConfig::default()
        };
        assert_eq!(RateScope::select(&off, Some(&m1), Some(ip)), RateScope::Global);

        let per_ip = RateLimitConfig {
            per_user: false,
            per_ip: true,
            ..RateLimitConfig::default()
        };
        assert_eq!(RateScope::select(&per_ip, Some(&m1), Some(ip)), RateScope::Ip(ip));
    }

    #[test]
    fn keys_carry_scope_and_window() {
        assert_eq!(RateScope::User("m1".into()).key(7), "rate_limit:user:m1:7");
        assert_eq!(RateScope::Global.key(7), "rate_limit:global:7");
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(RateScope::Ip(ip).key(7), "rate_limit:ip:10.1.2.3:7");
    }

    #[tokio::test]
    async fn first_rejection_is_limit_plus_one() {
        let (limiter, _) = limiter();
        let scope = RateScope::User("m1".into());
        let now = 1_700_000_010;

        for n in 1..=3 {
            let status = limiter.check_at(&scope, 3, 60, now).await.unwrap();
            assert!(!status.exceeded(), "request {n} should pass");
            assert_eq!(status.remaining, 3 - n);
        }
        let fourth = limiter.check_at(&scope, 3, 60, now).await.unwrap();
        assert!(fourth.exceeded());
        assert_eq!(fourth.remaining, 0);
        assert_eq!(fourth.error().limit_detail(), "3/min");
    }

    #[tokio::test]
    async fn next_window_starts_fresh() {
        let (limiter, _) = limiter();
        let scope = RateScope::Global;
        let window_start = 1_700_000_040;

        for _ in 0..2 {
            limiter.check_at(&scope, 1, 60, window_start).await.unwrap();
        }
        let next = limiter.check_at(&scope, 1, 60, window_start + 60).await.unwrap();
        assert_eq!(next.count, 1);
        assert!(!next.exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_end_of_window() {
        let (limiter, store) = limiter();
        let status = limiter
            .check_at(&RateScope::Global, 10, 60, 1_700_000_030)
            .await
            .unwrap();
        let window = 1_700_000_030 / 60;
        assert_eq!(status.reset_at, (window + 1) * 60);
        assert_eq!(
            store.ttl(&RateScope::Global.key(window)),
            Some(Duration::from_secs(60))
        );
    }

    /// Counts normally but cannot set expiries.
    struct NoExpiryStore(MemoryStore);

    #[async_trait]
    impl KvStore for NoExpiryStore {
        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            self.0.increment(key).await
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Command("expire rejected".into()))
        }
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.0.exists(key).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            self.0.set(key, value, ttl).await
        }
    }

    #[tokio::test]
    async fn failed_expiry_still_counts_the_request() {
        let limiter = RateLimiter::new(Arc::new(NoExpiryStore(MemoryStore::new())));
        let scope = RateScope::User("m1".into());
        let now = 1_700_000_010;

        let first = limiter.check_at(&scope, 2, 60, now).await.unwrap();
        assert_eq!(first.count, 1);
        let second = limiter.check_at(&scope, 2, 60, now).await.unwrap();
        assert_eq!(second.count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_without_ttl_gets_one_on_next_hit() {
        let (limiter, store) = limiter();
        let now = 1_700_000_000;
        let key = RateScope::Global.key(now / 60);
        // Left behind by an earlier INCR whose EXPIRE never landed.
        store.increment(&key).await.unwrap();
        assert_eq!(store.ttl(&key), None);

        let status = limiter.check_at(&RateScope::Global, 10, 60, now).await.unwrap();
        assert_eq!(status.count, 2);
        assert_eq!(store.ttl(&key), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let (limiter, store) = limiter();
        store.set_unavailable(true);
        assert!(limiter.check(&RateScope::Global, 1, 60).await.is_none());
    }
}
