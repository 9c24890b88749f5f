//! Circuit breaker for downstream dependencies.
//!
//! # States
//! - Closed: calls pass through, outcomes fill a count-based sliding window
//! - Open: calls short-circuit without a network attempt
//! - Half-Open: a fixed number of trial calls decide the next state
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold once minimum_calls outcomes exist
//! Open → Half-Open: after open_cooldown_secs
//! Half-Open → Closed: every trial call succeeds
//! Half-Open → Open: any trial call fails
//! ```
//!
//! All bookkeeping sits behind one mutex that is never held across an await.
//! Each transition bumps a generation; outcomes from calls admitted under an
//! older generation are dropped so a slow call cannot skew the new state.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::{self, Instant};

use crate::config::CircuitBreakerConfig;
use crate::error::DependencyError;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    /// Percentage of failures in the window, -1 until minimum_calls is reached.
    pub failure_rate: f64,
    pub buffered_calls: usize,
    pub number_of_successful_calls: usize,
    pub number_of_failed_calls: usize,
    pub number_of_not_permitted_calls: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    /// Most recent outcomes, `true` = success.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trials_admitted: usize,
    trials_succeeded: usize,
    not_permitted: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Admission ticket for one guarded call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.generation, self.trial, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // An abandoned trial hands its slot back.
        if !self.settled && self.trial {
            let mut inner = self.breaker.lock();
            if inner.generation == self.generation && inner.trials_admitted > 0 {
                inner.trials_admitted -= 1;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                window: VecDeque::new(),
                opened_at: None,
                trials_admitted: 0,
                trials_succeeded: 0,
                not_permitted: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another thread panicked mid-update; the
        // counters are still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state, applying the cooldown transition if it is due.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Guard `call`. A short-circuit yields `DependencyError::CircuitOpen`.
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T, DependencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        let permit = self.acquire().ok_or(DependencyError::CircuitOpen)?;
        let deadline = Duration::from_millis(self.config.call_timeout_ms);

        let outcome = match time::timeout(deadline, call()).await {
            Ok(result) => result,
            Err(_) => Err(DependencyError::Timeout(deadline)),
        };
        permit.settle(outcome.is_ok());
        outcome
    }

    /// Guard `call`, answering a short-circuit with `fallback()` instead of an error.
    pub async fn run<T, F, Fut, FB>(&self, call: F, fallback: FB) -> Result<T, DependencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
        FB: FnOnce() -> T,
    {
        match self.call(call).await {
            Err(DependencyError::CircuitOpen) => Ok(fallback()),
            other => other,
        }
    }

    /// Force the breaker open now, as if the failure threshold had been hit.
    pub fn trip(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Open);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        let successes = inner.window.iter().filter(|ok| **ok).count();
        let failures = inner.window.len() - successes;
        BreakerSnapshot {
            state: inner.state,
            failure_rate: self.failure_rate(&inner).unwrap_or(-1.0),
            buffered_calls: inner.window.len(),
            number_of_successful_calls: successes,
            number_of_failed_calls: failures,
            number_of_not_permitted_calls: inner.not_permitted,
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if inner.trials_admitted < self.config.permitted_calls_in_half_open => {
                inner.trials_admitted += 1;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.not_permitted += 1;
                return None;
            }
        };

        Some(Permit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    fn record(&self, generation: u64, trial: bool, success: bool) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }

        match (inner.state, trial) {
            (CircuitState::HalfOpen, true) => {
                if !success {
                    self.transition(&mut inner, CircuitState::Open);
                    return;
                }
                inner.trials_succeeded += 1;
                if inner.trials_succeeded >= self.config.permitted_calls_in_half_open {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            (CircuitState::Closed, false) => {
                inner.window.push_back(success);
                while inner.window.len() > self.config.sliding_window_size {
                    inner.window.pop_front();
                }
                if let Some(rate) = self.failure_rate(&inner) {
                    if rate >= self.config.failure_rate_threshold {
                        tracing::warn!(
                            target: "gateway.breaker",
                            dependency = %self.name,
                            failure_rate = rate,
                            threshold = self.config.failure_rate_threshold,
                            "failure rate over threshold"
                        );
                        self.transition(&mut inner, CircuitState::Open);
                    }
                }
            }
            _ => {}
        }
    }

    fn failure_rate(&self, inner: &Inner) -> Option<f64> {
        if inner.window.len() < self.config.minimum_calls {
            return None;
        }
        let failures = inner.window.iter().filter(|ok| !**ok).count();
        Some(failures as f64 * 100.0 / inner.window.len() as f64)
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooldown = Duration::from_secs(self.config.open_cooldown_secs);
        if inner.opened_at.is_some_and(|at| at.elapsed() >= cooldown) {
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.trials_admitted = 0;
        inner.trials_succeeded = 0;
        match to {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen => {}
        }
        if from != to {
            tracing::info!(
                target: "gateway.breaker",
                dependency = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker transition"
            );
            metrics::record_breaker_transition(&self.name, to);
        }
    }
}

/// One breaker per dependency name, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: DashMap::new(),
        }
    }

    /// Register a breaker with explicit settings, replacing any existing one.
    pub fn register(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.defaults.clone())))
            .clone()
    }

    pub fn snapshots(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 4,
            minimum_calls: 4,
            open_cooldown_secs: 10,
            permitted_calls_in_half_open: 2,
            call_timeout_ms: 100,
        }
    }

    async fn ok(breaker: &CircuitBreaker) -> Result<(), DependencyError> {
        breaker.call(|| async { Ok(()) }).await
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), DependencyError> {
        breaker
            .call(|| async { Err::<(), _>(DependencyError::NonSuccessStatus { status: 500 }) })
            .await
    }

    #[tokio::test]
    async fn stays_closed_below_minimum_calls() {
        let breaker = CircuitBreaker::new("svc", config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_rate, -1.0);
    }

    #[tokio::test]
    async fn opens_at_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::new("svc", config());
        ok(&breaker).await.unwrap();
        ok(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut called = false;
        let result = breaker
            .call(|| {
                called = true;
                async { Ok(()) }
            })
            .await;
        assert_eq!(result, Err(DependencyError::CircuitOpen));
        assert!(!called);
        assert_eq!(breaker.snapshot().number_of_not_permitted_calls, 1);
    }

    #[tokio::test]
    async fn run_returns_fallback_when_open() {
        let breaker = CircuitBreaker::new("svc", config());
        breaker.trip();
        let value = breaker
            .run(|| async { Ok("live") }, || "fallback")
            .await
            .unwrap();
        assert_eq!(value, "fallback");
    }

    #[tokio::test]
    async fn run_propagates_real_failures() {
        let breaker = CircuitBreaker::new("svc", config());
        let result = breaker
            .run(
                || async { Err::<&str, _>(DependencyError::Unreachable("refused".into())) },
                || "fallback",
            )
            .await;
        assert!(matches!(result, Err(DependencyError::Unreachable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let mut cfg = config();
        cfg.minimum_calls = 1;
        cfg.sliding_window_size = 1;
        let breaker = CircuitBreaker::new("svc", cfg);

        let result = breaker
            .call(|| async {
                time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(DependencyError::Timeout(Duration::from_millis(100))));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_successful_trials() {
        let breaker = CircuitBreaker::new("svc", config());
        breaker.trip();
        time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        ok(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        ok(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().buffered_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_reopens_on_trial_failure() {
        let breaker = CircuitBreaker::new("svc", config());
        breaker.trip();
        time::advance(Duration::from_secs(11)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Cooldown restarts from the reopen.
        time::advance(Duration::from_secs(5)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_limits_concurrent_trials() {
        let breaker = CircuitBreaker::new("svc", config());
        breaker.trip();
        time::advance(Duration::from_secs(10)).await;

        let first = breaker.acquire().expect("first trial");
        let second = breaker.acquire().expect("second trial");
        assert!(breaker.acquire().is_none());

        // Dropping an unsettled trial frees its slot.
        drop(second);
        assert!(breaker.acquire().is_some());
        first.settle(true);
    }

    #[tokio::test]
    async fn stale_outcome_is_ignored_after_transition() {
        let breaker = CircuitBreaker::new("svc", config());
        let permit = breaker.acquire().unwrap();
        breaker.trip();
        permit.settle(true);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().buffered_calls, 0);
    }

    #[tokio::test]
    async fn registry_keeps_breakers_independent() {
        let registry = CircuitBreakerRegistry::new(config());
        registry.get("memberService").trip();
        assert_eq!(registry.get("memberService").state(), CircuitState::Open);
        assert_eq!(registry.get("cartService").state(), CircuitState::Closed);

        let snapshots = registry.snapshots();
        assert_eq!(snapshots["memberService"].state, CircuitState::Open);
        assert_eq!(snapshots["cartService"].state, CircuitState::Closed);
    }
}
