//! Auth decision filter.
//!
//! Classifies every request as public, optional-auth or protected and
//! settles its identity:
//!
//! ```text
//! public   → Public                        (token never parsed)
//! optional → OptionalAuthenticated | OptionalGuest   (never fails)
//! protected: missing → parse → revoked → type → expired
//!          → ProtectedAuthenticated | Rejected(AuthError)
//! ```
//!
//! Identity headers are stripped from every inbound request before the
//! decision and re-injected from it.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request};
use uuid::Uuid;

use crate::auth::revocation::RevocationStore;
use crate::auth::token::{Claims, TokenCodec, TokenType, TokenVerifier};
use crate::config::{AuthConfig, RevocationFailMode};
use crate::error::{AuthError, GatewayError, StoreError};
use crate::http::chain::{Flow, RequestFilter};
use crate::http::request::RequestContext;
use crate::http::{
    IDENTITY_HEADERS, X_HAS_VALID_TOKEN, X_USER_EMAIL, X_USER_ID, X_USER_ROLE, X_USER_TYPE,
};
use crate::observability::metrics;
use crate::routing::PatternSet;
use crate::security::policy::PolicyHandle;

pub const GUEST_ROLE: &str = "GUEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Public,
    Optional,
    Protected,
}

/// Compiled public and optional-auth patterns.
#[derive(Debug, Clone)]
pub struct AccessRules {
    public: PatternSet,
    optional: PatternSet,
    fail_mode: RevocationFailMode,
}

impl AccessRules {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            public: PatternSet::compile(&config.public_paths),
            optional: PatternSet::compile(&config.optional_auth_paths),
            fail_mode: config.revocation_fail_mode,
        }
    }

    /// Optional-auth patterns take precedence over public ones.
    pub fn classify(&self, path: &str) -> PathClass {
        if self.optional.matches(path) {
            PathClass::Optional
        } else if self.public.matches(path) {
            PathClass::Public
        } else {
            PathClass::Protected
        }
    }

    pub fn requires_credential(&self, path: &str) -> bool {
        self.classify(path) == PathClass::Protected
    }

    pub fn fail_mode(&self) -> RevocationFailMode {
        self.fail_mode
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub email: String,
    pub role: String,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            email: claims.email.unwrap_or_default(),
            role: claims.role.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    Public,
    #[default]
    ProtectedUnauthenticated,
    ProtectedAuthenticated(Principal),
    OptionalGuest { guest_id: String },
    OptionalAuthenticated(Principal),
    Rejected(AuthError),
}

impl AuthState {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            AuthState::ProtectedAuthenticated(p) | AuthState::OptionalAuthenticated(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal().is_some()
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Public => "public",
            AuthState::ProtectedUnauthenticated => "protected_unauthenticated",
            AuthState::ProtectedAuthenticated(_) => "protected_authenticated",
            AuthState::OptionalGuest { .. } => "optional_guest",
            AuthState::OptionalAuthenticated(_) => "optional_authenticated",
            AuthState::Rejected(_) => "rejected",
        }
    }
}

/// Why a presented credential did not authenticate.
enum Refusal {
    Auth(AuthError),
    StoreUnavailable(StoreError),
}

impl From<AuthError> for Refusal {
    fn from(err: AuthError) -> Self {
        Refusal::Auth(err)
    }
}

/// `Some(token)` for a non-empty `Bearer` credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub struct AuthDecisionFilter {
    verifier: Arc<dyn TokenVerifier>,
    revocations: RevocationStore,
    policy: PolicyHandle,
}

impl AuthDecisionFilter {
    pub fn new(verifier: Arc<dyn TokenVerifier>, revocations: RevocationStore, policy: PolicyHandle) -> Self {
        Self {
            verifier,
            revocations,
            policy,
        }
    }

    /// Settle the auth state for `path`. `Err` only when the denylist is
    /// unreachable on a protected path in closed mode.
    pub async fn decide(&self, path: &str, headers: &HeaderMap) -> Result<AuthState, GatewayError> {
        let (class, fail_mode) = {
            let policy = self.policy.load();
            (policy.access.classify(path), policy.access.fail_mode())
        };
        match class {
            PathClass::Public => Ok(AuthState::Public),
            PathClass::Optional => {
                let outcome = match bearer_token(headers) {
                    Some(token) => self.authenticate(token, fail_mode).await,
                    None => Err(Refusal::Auth(AuthError::MissingCredential)),
                };
                Ok(match outcome {
                    Ok(principal) => AuthState::OptionalAuthenticated(principal),
                    Err(refusal) => {
                        if let Refusal::Auth(err) = &refusal {
                            tracing::debug!(target: "gateway.auth", kind = err.kind(), %path, "optional auth fell back to guest");
                        }
                        AuthState::OptionalGuest {
                            guest_id: format!("guest-{}", Uuid::new_v4()),
                        }
                    }
                })
            }
            PathClass::Protected => {
                let Some(token) = bearer_token(headers) else {
                    return Ok(AuthState::Rejected(AuthError::MissingCredential));
                };
                match self.authenticate(token, fail_mode).await {
                    Ok(principal) => Ok(AuthState::ProtectedAuthenticated(principal)),
                    Err(Refusal::Auth(err)) => Ok(AuthState::Rejected(err)),
                    Err(Refusal::StoreUnavailable(err)) => Err(GatewayError::ServiceUnavailable(
                        format!("revocation check failed: {err}"),
                    )),
                }
            }
        }
    }

    async fn authenticate(&self, token: &str, fail_mode: RevocationFailMode) -> Result<Principal, Refusal> {
        let claims = self.verifier.verify(token).map_err(AuthError::from)?;

        match self.revocations.is_denied(token).await {
            Ok(true) => return Err(AuthError::Revoked.into()),
            Ok(false) => {}
            Err(err) => {
                metrics::record_store_error("revocation_check");
                match fail_mode {
                    RevocationFailMode::Open => {
                        tracing::warn!(target: "gateway.auth", error = %err, "denylist unreachable, treating token as not revoked");
                    }
                    RevocationFailMode::Closed => {
                        tracing::warn!(target: "gateway.auth", error = %err, "denylist unreachable, refusing credential");
                        return Err(Refusal::StoreUnavailable(err));
                    }
                }
            }
        }

        if TokenCodec::classify(&claims) != Some(TokenType::Access) {
            return Err(AuthError::WrongType.into());
        }
        if TokenCodec::expired(&claims) {
            return Err(AuthError::Expired.into());
        }
        Ok(Principal::from(claims))
    }
}

/// Replace any caller-supplied identity headers with ones derived from `state`.
pub fn apply_identity(headers: &mut HeaderMap, state: &AuthState) {
    for name in IDENTITY_HEADERS {
        headers.remove(name);
    }

    match state {
        AuthState::ProtectedAuthenticated(p) | AuthState::OptionalAuthenticated(p) => {
            insert_text(headers, X_USER_ID, &p.subject);
            insert_text(headers, X_USER_EMAIL, &p.email);
            insert_text(headers, X_USER_ROLE, &p.role);
            headers.insert(X_USER_TYPE, HeaderValue::from_static("authenticated"));
            headers.insert(X_HAS_VALID_TOKEN, HeaderValue::from_static("true"));
        }
        AuthState::OptionalGuest { guest_id } => {
            insert_text(headers, X_USER_ID, guest_id);
            headers.insert(X_USER_EMAIL, HeaderValue::from_static(""));
            headers.insert(X_USER_ROLE, HeaderValue::from_static(GUEST_ROLE));
            headers.insert(X_USER_TYPE, HeaderValue::from_static("guest"));
            headers.insert(X_HAS_VALID_TOKEN, HeaderValue::from_static("false"));
        }
        AuthState::Public => {
            headers.insert(X_HAS_VALID_TOKEN, HeaderValue::from_static("false"));
        }
        AuthState::ProtectedUnauthenticated | AuthState::Rejected(_) => {}
    }
}

fn insert_text(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(target: "gateway.auth", header = name, "claim not representable as a header value, omitted"),
    }
}

#[async_trait]
impl RequestFilter for AuthDecisionFilter {
    fn name(&self) -> &'static str {
        "auth_decision"
    }

    async fn on_request(&self, ctx: &mut RequestContext, request: &mut Request<Body>) -> Flow {
        let state = match self.decide(&ctx.path, request.headers()).await {
            Ok(state) => state,
            Err(err) => {
                metrics::record_auth_decision("store_unavailable");
                return Flow::Halt(ctx.reject(err));
            }
        };
        metrics::record_auth_decision(state.label());
        apply_identity(request.headers_mut(), &state);
        ctx.auth = state;

        if let AuthState::Rejected(err) = &ctx.auth {
            tracing::debug!(target: "gateway.auth", trace_id = %ctx.trace_id, path = %ctx.path, kind = err.kind(), "credential rejected");
            return Flow::Halt(ctx.reject(*err));
        }
        Flow::Continue
    }
}
