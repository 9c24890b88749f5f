//! Health endpoints. Always 200; dependency trouble shows up in the body.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::health::aggregator::{DependencyHealth, HealthStatus};
use crate::http::server::AppState;
use crate::resilience::BreakerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Up,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct ServicesReport {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, DependencyHealth>,
}

impl ServicesReport {
    pub fn new(services: BTreeMap<String, DependencyHealth>) -> Self {
        let status = if services.values().all(|s| s.status == HealthStatus::Up) {
            OverallStatus::Up
        } else {
            OverallStatus::Degraded
        };
        Self {
            status,
            timestamp: Utc::now(),
            services,
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "UP",
        "service": state.service_name,
        "timestamp": Utc::now(),
    }))
}

/// `GET /health/services`
pub async fn services(State(state): State<AppState>) -> Json<ServicesReport> {
    Json(ServicesReport::new(state.aggregator.aggregate().await))
}

/// `GET /health/circuit-breakers`
pub async fn circuit_breakers(State(state): State<AppState>) -> Json<BTreeMap<String, BreakerSnapshot>> {
    Json(state.breakers.snapshots())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    fn dependency(status: HealthStatus) -> DependencyHealth {
        DependencyHealth {
            status,
            circuit_breaker: CircuitState::Closed,
            details: None,
            message: None,
            error: None,
        }
    }

    #[test]
    fn any_non_up_dependency_degrades() {
        let mut services = BTreeMap::new();
        services.insert("a".to_string(), dependency(HealthStatus::Up));
        assert_eq!(ServicesReport::new(services.clone()).status, OverallStatus::Up);

        services.insert("b".to_string(), dependency(HealthStatus::CircuitOpen));
        let report = ServicesReport::new(services);
        assert_eq!(report.status, OverallStatus::Degraded);
        assert_eq!(serde_json::to_value(&report).unwrap()["status"], "DEGRADED");
    }

    #[test]
    fn no_dependencies_is_up() {
        assert_eq!(ServicesReport::new(BTreeMap::new()).status, OverallStatus::Up);
    }
}
