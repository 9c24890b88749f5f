//! Route lookup.
//!
//! Immutable after construction. First configured match wins; an explicit
//! `None` is returned when nothing matches rather than a silent default.

use axum::http::Uri;
use url::Url;

use crate::config::GatewayConfig;
use crate::routing::matcher::PathPattern;

#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: PathPattern,
    pub dependency: String,
    base: Url,
}

impl Route {
    /// Rebase the incoming path and query onto the dependency's base URL.
    pub fn upstream_uri(&self, path_and_query: &str) -> Result<Uri, axum::http::uri::InvalidUri> {
        let base = self.base.as_str().trim_end_matches('/');
        format!("{base}{path_and_query}").parse()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile the route table. Routes naming unknown dependencies or carrying
    /// invalid patterns are dropped with a warning; validation catches both first.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let routes = config
            .routes
            .iter()
            .filter_map(|route| {
                let pattern = PathPattern::parse(&route.pattern)
                    .map_err(|e| tracing::warn!(error = %e, "skipping route"))
                    .ok()?;
                let dependency = config.dependency(&route.dependency).or_else(|| {
                    tracing::warn!(dependency = %route.dependency, "skipping route to unknown dependency");
                    None
                })?;
                let base = Url::parse(&dependency.base_url)
                    .map_err(|e| tracing::warn!(error = %e, dependency = %dependency.name, "skipping route"))
                    .ok()?;
                Some(Route {
                    pattern,
                    dependency: dependency.name.clone(),
                    base,
                })
            })
            .collect();
        Self { routes }
    }

    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.pattern.matches(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
