//! End-to-end request flow through a live gateway.

use std::sync::atomic::Ordering;

use serde_json::{json, Value};

use edge_gateway::auth::TokenType;
use edge_gateway::auth::TokenCodec;

mod common;

const PROTECTED: &str = "/api/v1/internal/products/42";

async fn setup() -> (common::TestGateway, common::MockDependency, common::MockDependency, common::MockDependency) {
    let member = common::start_dependency().await;
    let product = common::start_dependency().await;
    let cart = common::start_dependency().await;
    let gateway = common::start_gateway(common::test_config(&member, &product, &cart)).await;
    (gateway, member, product, cart)
}

#[tokio::test]
async fn authenticated_identity_reaches_dependency() {
    let (gateway, _member, product, _cart) = setup().await;
    let token = common::codec().issue_access("m1", "m1@example.com", "USER").unwrap();

    let res = common::client()
        .get(gateway.url(PROTECTED))
        .bearer_auth(&token)
        .header("X-User-Role", "ADMIN")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let trace_id = res.headers()["x-trace-id"].to_str().unwrap().to_string();
    let echoed: Value = res.json().await.unwrap();
    let headers = &echoed["headers"];
    assert_eq!(echoed["path"], PROTECTED);
    assert_eq!(headers["x-user-id"], "m1");
    assert_eq!(headers["x-user-role"], "USER", "spoofed role must be replaced");
    assert_eq!(headers["x-user-email"], "m1@example.com");
    assert_eq!(headers["x-user-type"], "authenticated");
    assert_eq!(headers["x-has-valid-token"], "true");
    assert_eq!(headers["x-gateway"], "edge-gateway");
    assert_eq!(headers["x-trace-id"], trace_id.as_str());
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(product.hits(), 1);
}

#[tokio::test]
async fn logout_revokes_both_tokens() {
    let (gateway, _member, _product, _cart) = setup().await;
    let codec = common::codec();
    let access = codec.issue_access("m1", "m1@example.com", "USER").unwrap();
    let refresh = codec.issue_refresh("m1").unwrap();
    let client = common::client();

    let res = client
        .post(gateway.url("/api/v1/auth/logout"))
        .bearer_auth(&access)
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Logout successful");

    let res = client.get(gateway.url(PROTECTED)).bearer_auth(&access).send().await.unwrap();
    assert_eq!(res.status(), 401);
    assert!(res.headers().contains_key("www-authenticate"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Token has been revoked");

    let res = client
        .post(gateway.url("/api/v1/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Token has been revoked");
}

#[tokio::test]
async fn logout_without_refresh_token_is_400() {
    let (gateway, _member, _product, _cart) = setup().await;
    let access = common::codec().issue_access("m1", "m1@example.com", "USER").unwrap();

    let res = common::client()
        .post(gateway.url("/api/v1/auth/logout"))
        .bearer_auth(&access)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn refresh_issues_access_token_from_member_record() {
    let (gateway, _member, _product, _cart) = setup().await;
    let codec = common::codec();
    let refresh = codec.issue_refresh("m1").unwrap();

    let res = common::client()
        .post(gateway.url("/api/v1/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    let data = &body["data"];
    assert_eq!(data["tokenType"], "Bearer");
    assert_eq!(data["expiresIn"], 900);
    assert_eq!(data["refreshToken"], refresh.as_str());

    let claims = codec.parse(data["accessToken"].as_str().unwrap()).unwrap();
    assert_eq!(TokenCodec::classify(&claims), Some(TokenType::Access));
    assert_eq!(claims.sub, "m1");
    assert_eq!(claims.role.as_deref(), Some("USER"));
}

#[tokio::test]
async fn refresh_rejects_access_tokens_and_unknown_members() {
    let (gateway, _member, _product, _cart) = setup().await;
    let codec = common::codec();
    let client = common::client();

    let access = codec.issue_access("m1", "m1@example.com", "USER").unwrap();
    let res = client
        .post(gateway.url("/api/v1/auth/refresh"))
        .json(&json!({ "refreshToken": access }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token type");

    let stranger = codec.issue_refresh("nobody").unwrap();
    let res = client
        .post(gateway.url("/api/v1/auth/refresh"))
        .json(&json!({ "refreshToken": stranger }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn user_window_allows_limit_then_rejects() {
    let (gateway, _member, product, _cart) = setup().await;
    let token = common::codec().issue_access("m1", "m1@example.com", "USER").unwrap();
    let client = common::client();
    common::wait_for_fresh_minute().await;

    for _ in 1..300 {
        let res = client.get(gateway.url(PROTECTED)).bearer_auth(&token).send().await.unwrap();
        assert_eq!(res.status(), 200);
    }

    let res = client.get(gateway.url(PROTECTED)).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), 200, "request #300 is still within the limit");
    assert_eq!(res.headers()["x-ratelimit-limit"], "300");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");

    let res = client.get(gateway.url(PROTECTED)).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
    assert!(res.headers().contains_key("x-ratelimit-reset"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Rate limit exceeded");
    assert_eq!(body["details"]["limit"], "300/min");

    assert_eq!(product.hits(), 300, "the rejected request is not forwarded");
}

#[tokio::test]
async fn optional_path_never_returns_401() {
    let (gateway, _member, _product, cart) = setup().await;
    let client = common::client();
    let refresh = common::codec().issue_refresh("m1").unwrap();

    for credential in [None, Some("garbage"), Some(refresh.as_str())] {
        let mut request = client.get(gateway.url("/api/v1/cart/items"));
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }
        let res = request.send().await.unwrap();
        assert_eq!(res.status(), 200);
        let echoed: Value = res.json().await.unwrap();
        let headers = &echoed["headers"];
        assert_eq!(headers["x-user-type"], "guest");
        assert_eq!(headers["x-user-role"], "GUEST");
        assert_eq!(headers["x-has-valid-token"], "false");
        assert!(headers["x-user-id"].as_str().unwrap().starts_with("guest-"));
    }
    assert_eq!(cart.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn expired_token_never_reaches_dependency() {
    let (gateway, _member, product, _cart) = setup().await;
    let codec = common::codec();
    let now = edge_gateway::auth::token::now_unix();
    let expired = codec
        .sign(&edge_gateway::auth::Claims {
            sub: "m1".into(),
            email: Some("m1@example.com".into()),
            role: Some("USER".into()),
            token_type: Some("access".into()),
            iat: now - 1800,
            exp: now - 900,
        })
        .unwrap();

    let res = common::client()
        .get(gateway.url(PROTECTED))
        .bearer_auth(&expired)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid or expired token");
    assert_eq!(body["path"], PROTECTED);
    assert_eq!(product.hits(), 0);
}

#[tokio::test]
async fn public_path_ignores_credentials() {
    let (gateway, _member, product, _cart) = setup().await;

    let res = common::client()
        .get(gateway.url("/api/v1/products/42"))
        .bearer_auth("definitely-not-a-token")
        .header("X-User-Id", "spoofed")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let echoed: Value = res.json().await.unwrap();
    let headers = &echoed["headers"];
    assert_eq!(headers["x-has-valid-token"], "false");
    assert!(headers.get("x-user-id").is_none());
    assert_eq!(product.hits(), 1);
}

#[tokio::test]
async fn open_member_breaker_is_reported_separately() {
    let (gateway, _member, _product, cart) = setup().await;
    cart.healthy.store(false, Ordering::SeqCst);
    gateway.state.breakers.get("memberService").trip();
    let client = common::client();

    let res = client.get(gateway.url("/health/services")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "DEGRADED");
    let services = &body["services"];
    assert_eq!(services["memberService"]["status"], "CIRCUIT_OPEN");
    assert_eq!(services["memberService"]["circuitBreaker"], "OPEN");
    assert_eq!(
        services["memberService"]["message"],
        "Service temporarily unavailable. Circuit breaker is OPEN."
    );
    assert_eq!(services["productService"]["status"], "UP");
    assert_eq!(services["productService"]["details"]["status"], "UP");
    assert_eq!(services["cartService"]["status"], "DOWN");
    assert_eq!(services["cartService"]["circuitBreaker"], "CLOSED");

    let res = client.get(gateway.url("/health/circuit-breakers")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let breakers: Value = res.json().await.unwrap();
    assert_eq!(breakers["memberService"]["state"], "OPEN");
    assert_eq!(breakers["productService"]["state"], "CLOSED");
    assert!(breakers["memberService"]["numberOfNotPermittedCalls"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn liveness_reports_service_name() {
    let (gateway, _member, _product, _cart) = setup().await;
    let res = common::client().get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "UP");
    assert_eq!(body["service"], "edge-gateway");
}
