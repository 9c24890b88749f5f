//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log shipping
//!     → Prometheus scrape on observability.metrics_address
//! ```
//!
//! The request trace id is carried as a structured field on every event
//! emitted while a request is in the chain.

pub mod logging;
pub mod metrics;
