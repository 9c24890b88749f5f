//! Active health monitoring.
//!
//! Periodically runs the aggregator so breakers keep learning while nobody
//! is looking at `/health/services`, feeds the dependency gauge, and logs
//! status changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::health::aggregator::{DependencyHealthAggregator, HealthStatus};
use crate::observability::metrics;

pub struct HealthMonitor {
    aggregator: Arc<DependencyHealthAggregator>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(aggregator: Arc<DependencyHealthAggregator>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            tracing::info!("active health monitor disabled");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "health monitor starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut last: HashMap<String, HealthStatus> = HashMap::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all(&mut last).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn check_all(&self, last: &mut HashMap<String, HealthStatus>) {
        for (name, health) in self.aggregator.aggregate().await {
            metrics::record_dependency_up(&name, health.status == HealthStatus::Up);

            let previous = last.insert(name.clone(), health.status);
            if previous.is_some_and(|p| p != health.status) {
                tracing::warn!(
                    target: "gateway.health",
                    dependency = %name,
                    from = ?previous,
                    to = ?health.status,
                    breaker = health.circuit_breaker.as_str(),
                    "dependency status changed"
                );
            }
        }
    }
}
