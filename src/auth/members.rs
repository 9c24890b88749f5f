//! Member lookup used when a refresh token is exchanged.
//!
//! The member service is an external collaborator; the gateway only needs a
//! subject's current email and role to mint a fresh access token.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::DependencyError;
use crate::http::{UpstreamClient, GATEWAY_HEADER, GATEWAY_ID};
use crate::resilience::CircuitBreaker;

const MAX_MEMBER_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(alias = "id")]
    pub member_id: String,
    pub email: String,
    pub role: String,
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// `Ok(None)` when the member does not exist.
    async fn find(&self, member_id: &str) -> Result<Option<Member>, DependencyError>;
}

/// `{success, message, data}` envelope returned by the member service.
#[derive(Deserialize)]
struct Envelope {
    data: Option<Member>,
}

/// Looks members up over HTTP, behind the member service's breaker.
pub struct HttpMemberDirectory {
    client: UpstreamClient,
    base: Url,
    breaker: Arc<CircuitBreaker>,
}

impl HttpMemberDirectory {
    pub fn new(client: UpstreamClient, base: Url, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client,
            base,
            breaker,
        }
    }

    fn member_url(&self, member_id: &str) -> Result<Url, DependencyError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DependencyError::InvalidResponse("member service URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["api", "v1", "members", member_id]);
        Ok(url)
    }

    async fn fetch(&self, member_id: &str) -> Result<Option<Member>, DependencyError> {
        let url = self.member_url(member_id)?;
        let request = Request::get(url.as_str())
            .header(GATEWAY_HEADER, GATEWAY_ID)
            .body(Body::empty())
            .map_err(|e| DependencyError::InvalidResponse(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| DependencyError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DependencyError::NonSuccessStatus {
                status: status.as_u16(),
            });
        }

        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_MEMBER_BODY_BYTES)
            .await
            .map_err(|e| DependencyError::InvalidResponse(e.to_string()))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| DependencyError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl MemberDirectory for HttpMemberDirectory {
    async fn find(&self, member_id: &str) -> Result<Option<Member>, DependencyError> {
        self.breaker.call(|| self.fetch(member_id)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use axum::extract::Path;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_member_service() -> Url {
        let app = Router::new().route(
            "/api/v1/members/{id}",
            get(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "m1" => Json(json!({
                        "success": true,
                        "message": "ok",
                        "data": {"memberId": "m1", "email": "m1@example.com", "name": "M", "role": "USER"}
                    }))
                    .into_response(),
                    "broken" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response(),
                    _ => (StatusCode::NOT_FOUND, Json(json!({"success": false}))).into_response(),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn directory(base: Url) -> HttpMemberDirectory {
        HttpMemberDirectory::new(
            crate::http::upstream_client(std::time::Duration::from_secs(1)),
            base,
            Arc::new(CircuitBreaker::new("memberService", CircuitBreakerConfig::default())),
        )
    }

    #[tokio::test]
    async fn finds_existing_member() {
        let directory = directory(spawn_member_service().await);
        let member = directory.find("m1").await.unwrap().unwrap();
        assert_eq!(member.email, "m1@example.com");
        assert_eq!(member.role, "USER");
    }

    #[tokio::test]
    async fn unknown_member_is_none() {
        let directory = directory(spawn_member_service().await);
        assert_eq!(directory.find("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_is_dependency_failure() {
        let directory = directory(spawn_member_service().await);
        assert_eq!(
            directory.find("broken").await,
            Err(DependencyError::NonSuccessStatus { status: 500 })
        );
    }

    #[tokio::test]
    async fn member_id_is_path_encoded() {
        let directory = directory(Url::parse("http://members:8080/").unwrap());
        let url = directory.member_url("../admin?x=1").unwrap();
        assert_eq!(url.path(), "/api/v1/members/..%2Fadmin%3Fx=1");
    }
}
