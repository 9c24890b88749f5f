//! Credential subsystem.
//!
//! # Data Flow
//! ```text
//! token.rs       issue / parse HS256 credentials
//! revocation.rs  sha256-keyed denylist in the shared store
//! members.rs     member lookup for refresh, behind a breaker
//! handlers.rs    POST /api/v1/auth/logout, POST /api/v1/auth/refresh
//! ```

pub mod handlers;
pub mod members;
pub mod revocation;
pub mod token;

pub use members::{HttpMemberDirectory, Member, MemberDirectory};
pub use revocation::{RevocationError, RevocationStore};
pub use token::{Claims, TokenCodec, TokenError, TokenType, TokenVerifier};
