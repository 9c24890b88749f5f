//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency (health probe, member lookup):
//!     → CircuitBreakerRegistry::get(name)
//!     → breaker.call / breaker.run (admission, deadline, outcome recording)
//!     → Open: short-circuit (CircuitOpen or fallback), no network attempt
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline; a timeout is a failure
//! - One breaker per dependency, never global
//! - No retries at this layer

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
