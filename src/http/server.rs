//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway-owned handlers
//! - Wire up the filter chain and outer layers (trace, panic, timeout, body limit)
//! - Bind server to listener with graceful shutdown
//! - Forward everything else to the matching dependency
//! - Swap the request policy on config reload
//! - Run the active health monitor

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, Version};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use url::Url;
use uuid::Uuid;

use crate::auth::handlers as auth_handlers;
use crate::auth::{HttpMemberDirectory, MemberDirectory, RevocationStore, TokenCodec};
use crate::config::schema::MEMBER_SERVICE;
use crate::config::GatewayConfig;
use crate::error::{DependencyError, GatewayError};
use crate::health::handlers as health_handlers;
use crate::health::{DependencyHealthAggregator, HealthMonitor};
use crate::http::access_log::AccessLogFilter;
use crate::http::chain::{filter_chain_middleware, panic_detail, FilterChain, RequestFilter};
use crate::http::request::RequestContext;
use crate::http::{upstream_client, UpstreamClient, GATEWAY_HEADER, GATEWAY_ID};
use crate::lifecycle::Shutdown;
use crate::resilience::CircuitBreakerRegistry;
use crate::routing::{Route, RouteTable};
use crate::security::policy::{apply_reload, EdgePolicy, PolicyHandle};
use crate::security::{cors_layer, AuthDecisionFilter, RateLimiter, SecurityHeadersFilter, TrafficControlFilter};
use crate::store::KvStore;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub policy: PolicyHandle,
    pub codec: Arc<TokenCodec>,
    pub revocations: RevocationStore,
    pub members: Option<Arc<dyn MemberDirectory>>,
    pub aggregator: Arc<DependencyHealthAggregator>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub routes: Arc<RouteTable>,
    pub client: UpstreamClient,
    pub service_name: String,
    pub upstream_timeout: Duration,
}

/// HTTP server for the edge gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
    filters: Vec<&'static str>,
}

impl HttpServer {
    /// Build every subsystem from a validated config and a connected store.
    pub fn new(config: GatewayConfig, store: Arc<dyn KvStore>) -> Self {
        let policy = EdgePolicy::handle(&config);
        let codec = Arc::new(TokenCodec::new(
            config.auth.secret.as_bytes(),
            Duration::from_secs(config.auth.access_token_ttl_secs),
            Duration::from_secs(config.auth.refresh_token_ttl_secs),
        ));
        let revocations = RevocationStore::new(
            Arc::clone(&store),
            Arc::clone(&codec),
            Duration::from_secs(config.auth.default_revocation_ttl_secs),
        );
        let client = upstream_client(Duration::from_secs(config.timeouts.connect_secs));

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        for dependency in &config.dependencies {
            breakers.register(&dependency.name, config.breaker_for(dependency));
        }

        let members = config.dependency(MEMBER_SERVICE).and_then(|dependency| {
            let base = Url::parse(&dependency.base_url)
                .map_err(|e| tracing::warn!(error = %e, "member service URL invalid, refresh disabled"))
                .ok()?;
            let directory = HttpMemberDirectory::new(client.clone(), base, breakers.get(&dependency.name));
            Some(Arc::new(directory) as Arc<dyn MemberDirectory>)
        });
        if members.is_none() {
            tracing::warn!(dependency = MEMBER_SERVICE, "no member service configured, token refresh will answer 503");
        }

        let aggregator = Arc::new(DependencyHealthAggregator::from_config(
            &config,
            &client,
            Arc::clone(&breakers),
        ));

        let state = AppState {
            policy: Arc::clone(&policy),
            codec: Arc::clone(&codec),
            revocations: revocations.clone(),
            members,
            aggregator,
            breakers,
            routes: Arc::new(RouteTable::from_config(&config)),
            client,
            service_name: config.listener.service_name.clone(),
            upstream_timeout: Duration::from_secs(config.timeouts.upstream_secs),
        };

        let filters: Vec<Arc<dyn RequestFilter>> = vec![
            Arc::new(SecurityHeadersFilter::new(Arc::clone(&policy))),
            Arc::new(AccessLogFilter),
            Arc::new(AuthDecisionFilter::new(codec, revocations, Arc::clone(&policy))),
            Arc::new(TrafficControlFilter::new(RateLimiter::new(store), Arc::clone(&policy))),
        ];
        let chain = FilterChain::new(filters, policy)
            .with_request_timeout(Duration::from_secs(config.timeouts.request_secs));
        let filter_names = chain.names();

        let router = Self::build_router(&config, state.clone(), chain);
        Self {
            router,
            config,
            state,
            filters: filter_names,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState, chain: FilterChain) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handlers::health))
            .route("/health/services", get(health_handlers::services))
            .route("/health/circuit-breakers", get(health_handlers::circuit_breakers))
            .route("/api/v1/auth/logout", post(auth_handlers::logout))
            .route("/api/v1/auth/refresh", post(auth_handlers::refresh))
            .fallback(proxy_handler)
            .with_state(state)
            // Streaming bodies without a Content-Length are capped here; declared
            // lengths are rejected earlier by the chain with the uniform body.
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            // The request timeout and handler panics are rendered inside the chain.
            .layer(middleware::from_fn_with_state(chain, filter_chain_middleware));

        if let Some(cors) = cors_layer(&config.cors) {
            router = router.layer(cors);
        }

        // Backstop for a panic inside a filter itself.
        router
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http())
    }

    /// The assembled router, for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
        shutdown: &Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            filters = ?self.filters,
            routes = self.state.routes.len(),
            "HTTP server starting"
        );

        let monitor = HealthMonitor::new(
            Arc::clone(&self.state.aggregator),
            Duration::from_secs(self.config.health.monitor_interval_secs),
        );
        tokio::spawn(monitor.run(shutdown.subscribe()));

        if let Some(updates) = config_updates {
            tokio::spawn(reload_policy(
                Arc::clone(&self.state.policy),
                self.config.clone(),
                updates,
                shutdown.subscribe(),
            ));
        }

        let mut stop = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn reload_policy(
    policy: PolicyHandle,
    mut current: GatewayConfig,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(next) => {
                    apply_reload(&policy, &current, &next);
                    current = next;
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    GatewayError::Internal(format!("filter panicked: {}", panic_detail(err.as_ref())))
        .at("", Uuid::new_v4().to_string())
        .into_response()
}

/// Forward to the first matching route's dependency.
async fn proxy_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    request: Request<Body>,
) -> Response {
    let Some(route) = state.routes.resolve(&ctx.path) else {
        tracing::debug!(trace_id = %ctx.trace_id, path = %ctx.path, "no route matched");
        return ctx.reject(GatewayError::NotFound("No route found for path".to_string()));
    };

    match forward(&state, &ctx, route, request).await {
        Ok(response) => response,
        Err(err) => ctx.reject(err),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

async fn forward(
    state: &AppState,
    ctx: &RequestContext,
    route: &Route,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let uri = route
        .upstream_uri(path_and_query)
        .map_err(|e| GatewayError::Internal(format!("cannot build upstream URI: {e}")))?;

    strip_hop_by_hop(&mut parts.headers);
    parts.headers.remove(header::HOST);
    parts.headers.insert(GATEWAY_HEADER, HeaderValue::from_static(GATEWAY_ID));
    if let Some(peer) = ctx.peer_ip {
        let chain = match parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(prior) if state.policy.load().security.trust_forwarded_headers => {
                format!("{prior}, {peer}")
            }
            _ => peer.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            parts.headers.insert("x-forwarded-for", value);
        }
    }

    parts.uri = uri;
    parts.version = Version::HTTP_11;
    let upstream = Request::from_parts(parts, body);

    tracing::debug!(
        trace_id = %ctx.trace_id,
        dependency = %route.dependency,
        pattern = ?route.pattern,
        "forwarding request"
    );

    let response = match tokio::time::timeout(state.upstream_timeout, state.client.request(upstream)).await {
        Err(_) => {
            return Err(GatewayError::Upstream(DependencyError::Timeout(state.upstream_timeout)));
        }
        Ok(Err(e)) => return Err(GatewayError::Upstream(DependencyError::Unreachable(e.to_string()))),
        Ok(Ok(response)) => response,
    };

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}
