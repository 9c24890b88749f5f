//! Gateway-owned auth endpoints: logout and token refresh.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};

use crate::auth::token::{TokenCodec, TokenType};
use crate::config::RevocationFailMode;
use crate::error::{AuthError, GatewayError};
use crate::http::request::RequestContext;
use crate::http::response::ApiResponse;
use crate::http::server::AppState;
use crate::security::access_control::bearer_token;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest {
    refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

fn refresh_token_from(body: &Bytes) -> Result<String, GatewayError> {
    let request: RefreshTokenRequest = serde_json::from_slice(body)
        .map_err(|_| GatewayError::BadRequest("Request body must contain refreshToken".to_string()))?;
    let token = request.refresh_token.trim();
    if token.is_empty() {
        return Err(GatewayError::BadRequest("refreshToken is required".to_string()));
    }
    Ok(token.to_string())
}

/// `POST /api/v1/auth/logout`: revoke the presented access token and the
/// refresh token from the body.
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let access_token = bearer_token(&headers).ok_or(AuthError::MissingCredential)?;
        let refresh_token = refresh_token_from(&body)?;

        state
            .revocations
            .deny_pair(access_token, &refresh_token)
            .await
            .map_err(|e| GatewayError::ServiceUnavailable(e.to_string()))?;

        tracing::info!(target: "gateway.auth", trace_id = %ctx.trace_id, "logout completed");
        Ok::<_, GatewayError>(ApiResponse::ok(
            "Logout successful",
            "Logged out successfully",
            &ctx.trace_id,
        ))
    }
    .await;

    match result {
        Ok(reply) => reply.into_response(),
        Err(err) => ctx.reject(err),
    }
}

/// `POST /api/v1/auth/refresh`: exchange a refresh token for a new access token.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    match exchange(&state, &ctx, &body).await {
        Ok(pair) => ApiResponse::ok("Token refreshed successfully", pair, &ctx.trace_id).into_response(),
        Err(err) => ctx.reject(err),
    }
}

async fn exchange(state: &AppState, ctx: &RequestContext, body: &Bytes) -> Result<TokenPair, GatewayError> {
    let refresh_token = refresh_token_from(body)?;

    match state.revocations.is_denied(&refresh_token).await {
        Ok(true) => return Err(AuthError::Revoked.into()),
        Ok(false) => {}
        Err(err) => {
            let fail_mode = state.policy.load().access.fail_mode();
            if fail_mode == RevocationFailMode::Closed {
                return Err(GatewayError::ServiceUnavailable(format!("revocation check failed: {err}")));
            }
            tracing::warn!(target: "gateway.auth", trace_id = %ctx.trace_id, error = %err, "denylist unreachable during refresh, continuing");
        }
    }

    let claims = state.codec.parse(&refresh_token).map_err(AuthError::from)?;
    if TokenCodec::classify(&claims) != Some(TokenType::Refresh) {
        return Err(AuthError::WrongType.into());
    }
    if TokenCodec::expired(&claims) {
        return Err(AuthError::Expired.into());
    }

    let Some(members) = state.members.as_ref() else {
        return Err(GatewayError::ServiceUnavailable("member directory not configured".to_string()));
    };
    let member = match members.find(&claims.sub).await {
        Ok(Some(member)) => member,
        Ok(None) => return Err(GatewayError::NotFound("Member not found".to_string())),
        Err(err) => return Err(GatewayError::ServiceUnavailable(format!("member lookup failed: {err}"))),
    };

    let access_token = state
        .codec
        .issue_access(&member.member_id, &member.email, &member.role)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    tracing::info!(target: "gateway.auth", trace_id = %ctx.trace_id, "access token refreshed");
    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.codec.access_ttl().as_secs(),
    })
}
