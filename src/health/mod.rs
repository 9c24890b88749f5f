//! Dependency health subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health/services or monitor tick (active.rs)
//!     → aggregator.rs: one spawned task per dependency
//!         → breaker.run(probe, fallback)
//!             → probe.rs: GET {base_url}{health_path}
//!     → UP | DOWN | CIRCUIT_OPEN per dependency
//! ```
//!
//! DOWN means the probe ran and failed; CIRCUIT_OPEN means the breaker
//! refused to run it. The two are never merged.

pub mod active;
pub mod aggregator;
pub mod handlers;
pub mod probe;

pub use active::HealthMonitor;
pub use aggregator::{DependencyHealth, DependencyHealthAggregator, HealthStatus, CIRCUIT_OPEN_MESSAGE};
pub use probe::{HealthProbe, HttpProbe, ProbeReport};
