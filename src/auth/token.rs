//! Credential issuing and parsing.
//!
//! # Security
//!
//! - HS256 with one symmetric key; any other algorithm is `Unsupported`
//! - Tokens are size-checked BEFORE parsing
//! - Zero clock leeway: a token is expired the second after `exp`
//! - `sub` and `email` are redacted in Debug output

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AuthError;

/// Maximum accepted token size in bytes (8KB).
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token uses an unsupported algorithm")]
    Unsupported,
    #[error("token could not be signed")]
    Signing,
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::Expired,
            TokenError::BadSignature => AuthError::BadSignature,
            TokenError::Malformed | TokenError::Unsupported | TokenError::Signing => {
                AuthError::Malformed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Kept raw so an unknown value classifies as "not access" instead of
    /// failing to parse.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("token_type", &self.token_type)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Anything that can turn a bearer string into verified claims.
///
/// `TokenCodec` is the production implementation; the seam lets the access
/// filter be exercised with a verifier that records whether it was called.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// Issues and parses HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

impl TokenCodec {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue_access(&self, subject: &str, email: &str, role: &str) -> Result<String, TokenError> {
        let iat = now_unix();
        self.sign(&Claims {
            sub: subject.to_string(),
            email: Some(email.to_string()),
            role: Some(role.to_string()),
            token_type: Some(TokenType::Access.as_str().to_string()),
            iat,
            exp: iat + self.access_ttl.as_secs() as i64,
        })
    }

    pub fn issue_refresh(&self, subject: &str) -> Result<String, TokenError> {
        let iat = now_unix();
        self.sign(&Claims {
            sub: subject.to_string(),
            email: None,
            role: None,
            token_type: Some(TokenType::Refresh.as_str().to_string()),
            iat,
            exp: iat + self.refresh_ttl.as_secs() as i64,
        })
    }

    /// Sign arbitrary claims with the gateway key.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding).map_err(|e| {
            tracing::error!(target: "gateway.auth.token", error = %e, "token signing failed");
            TokenError::Signing
        })
    }

    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        if token.is_empty() || token.len() > MAX_TOKEN_SIZE_BYTES {
            return Err(TokenError::Malformed);
        }

        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Unsupported);
        }

        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidAlgorithm => TokenError::Unsupported,
                _ => TokenError::Malformed,
            })
    }

    /// `None` for a token without a recognised `type` claim.
    pub fn classify(claims: &Claims) -> Option<TokenType> {
        match claims.token_type.as_deref() {
            Some("access") => Some(TokenType::Access),
            Some("refresh") => Some(TokenType::Refresh),
            _ => None,
        }
    }

    pub fn expired(claims: &Claims) -> bool {
        claims.exp < now_unix()
    }

    /// Seconds until expiry, never below one.
    pub fn remaining_secs(claims: &Claims) -> u64 {
        (claims.exp - now_unix()).max(1) as u64
    }
}

impl TokenVerifier for TokenCodec {
    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.parse(token)
    }
}
