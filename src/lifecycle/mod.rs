//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → Connect store
//!     → Build server → Bind listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Stop accepting → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! Startup is fail-fast: an invalid config or an unreachable store exits
//! non-zero before the listener is bound.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
