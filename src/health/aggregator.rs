//! Per-dependency health under circuit breaking.
//!
//! Each probe runs through its dependency's breaker on its own task. The
//! report keeps three outcomes apart:
//! - `UP`: the dependency answered 2xx
//! - `DOWN`: the probe was attempted and failed (non-2xx, unreachable, timeout)
//! - `CIRCUIT_OPEN`: the breaker refused the call, nothing was sent

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::DependencyError;
use crate::health::probe::{HealthProbe, HttpProbe, ProbeReport};
use crate::http::UpstreamClient;
use crate::resilience::{BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState};

pub const CIRCUIT_OPEN_MESSAGE: &str = "Service temporarily unavailable. Circuit breaker is OPEN.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    Down,
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub status: HealthStatus,
    pub circuit_breaker: CircuitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a guarded probe: either the dependency was reached or the
/// breaker answered with its fallback.
enum ProbeOutcome {
    Reached(ProbeReport),
    ShortCircuited,
}

struct MonitoredDependency {
    name: String,
    probe: Arc<dyn HealthProbe>,
}

pub struct DependencyHealthAggregator {
    dependencies: Vec<MonitoredDependency>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl DependencyHealthAggregator {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            dependencies: Vec::new(),
            breakers,
        }
    }

    /// HTTP probes for every configured dependency.
    pub fn from_config(
        config: &GatewayConfig,
        client: &UpstreamClient,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        config.dependencies.iter().fold(Self::new(breakers), |agg, dep| {
            let probe = HttpProbe::new(client.clone(), &dep.base_url, &dep.health_path);
            agg.with_probe(&dep.name, Arc::new(probe))
        })
    }

    pub fn with_probe(mut self, name: &str, probe: Arc<dyn HealthProbe>) -> Self {
        self.dependencies.push(MonitoredDependency {
            name: name.to_string(),
            probe,
        });
        self
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }

    /// Probe every dependency concurrently.
    pub async fn aggregate(&self) -> BTreeMap<String, DependencyHealth> {
        let tasks = self.dependencies.iter().map(|dep| {
            let name = dep.name.clone();
            let probe = Arc::clone(&dep.probe);
            let breaker = self.breakers.get(&dep.name);
            // Spawned so a dropped caller cannot cut a probe short and skew the breaker.
            let handle = tokio::spawn(async move { check(&breaker, probe.as_ref()).await });
            async move {
                let health = handle.await.unwrap_or_else(|e| {
                    tracing::error!(target: "gateway.health", dependency = %name, error = %e, "probe task failed");
                    DependencyHealth {
                        status: HealthStatus::Down,
                        circuit_breaker: CircuitState::Closed,
                        details: None,
                        message: None,
                        error: Some("probe task failed".to_string()),
                    }
                });
                (name, health)
            }
        });

        join_all(tasks).await.into_iter().collect()
    }

    pub fn breaker_report(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.dependencies
            .iter()
            .map(|dep| (dep.name.clone(), self.breakers.get(&dep.name).snapshot()))
            .collect()
    }
}

async fn check(breaker: &CircuitBreaker, probe: &dyn HealthProbe) -> DependencyHealth {
    let outcome = breaker
        .run(
            || async { probe.probe().await.map(ProbeOutcome::Reached) },
            || ProbeOutcome::ShortCircuited,
        )
        .await;
    let circuit_breaker = breaker.state();

    match outcome {
        Ok(ProbeOutcome::Reached(report)) => DependencyHealth {
            status: HealthStatus::Up,
            circuit_breaker,
            details: Some(report.body),
            message: None,
            error: None,
        },
        Ok(ProbeOutcome::ShortCircuited) => DependencyHealth {
            status: HealthStatus::CircuitOpen,
            circuit_breaker,
            details: None,
            message: Some(CIRCUIT_OPEN_MESSAGE.to_string()),
            error: None,
        },
        Err(err) => {
            tracing::warn!(target: "gateway.health", dependency = %breaker.name(), error = %err, "dependency probe failed");
            DependencyHealth {
                status: HealthStatus::Down,
                circuit_breaker,
                details: None,
                message: None,
                error: Some(describe(&err)),
            }
        }
    }
}

fn describe(err: &DependencyError) -> String {
    match err {
        DependencyError::NonSuccessStatus { status } => format!("health endpoint returned {status}"),
        DependencyError::Timeout(after) => format!("no answer within {}ms", after.as_millis()),
        DependencyError::Unreachable(_) => "connection failed".to_string(),
        DependencyError::InvalidResponse(_) => "unreadable health response".to_string(),
        DependencyError::CircuitOpen => CIRCUIT_OPEN_MESSAGE.to_string(),
    }
}
