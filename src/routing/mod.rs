//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → matcher.rs (PathPattern: exact or `/**` prefix)
//!     → router.rs (RouteTable: first match → dependency base URL)
//!     → Return: matched Route or None
//! ```
//!
//! The same pattern type drives the public / optional-auth path rules in
//! `security::access_control`.

pub mod matcher;
pub mod router;

pub use matcher::{PathPattern, PatternSet};
pub use router::{Route, RouteTable};
