//! Cross-origin access for browser clients.
//!
//! The layer sits outside the filter chain: preflights are answered before
//! authentication, and every other response picks up the CORS headers on
//! the way out.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::config::CorsConfig;

const WILDCARD: &str = "*";

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == WILDCARD)
}

fn parsed<T, E: std::fmt::Display>(
    field: &'static str,
    values: &[String],
    parse: impl Fn(&str) -> Result<T, E>,
) -> Vec<T> {
    values
        .iter()
        .filter_map(|raw| match parse(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(field, value = %raw, error = %e, "ignoring unusable CORS entry");
                None
            }
        })
        .collect()
}

/// `None` when CORS is disabled.
pub fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if !config.enabled {
        return None;
    }

    let origins = if is_wildcard(&config.allowed_origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parsed("allowed_origins", &config.allowed_origins, HeaderValue::from_str))
    };
    let methods = if is_wildcard(&config.allowed_methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(parsed("allowed_methods", &config.allowed_methods, |m| {
            m.parse::<Method>()
        }))
    };
    let headers = if is_wildcard(&config.allowed_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(parsed("allowed_headers", &config.allowed_headers, |h| {
            h.parse::<HeaderName>()
        }))
    };
    let exposed = if is_wildcard(&config.exposed_headers) {
        ExposeHeaders::any()
    } else {
        ExposeHeaders::list(parsed("exposed_headers", &config.exposed_headers, |h| {
            h.parse::<HeaderName>()
        }))
    };

    // Browsers refuse credentialed responses carrying a wildcard, and the
    // layer panics on that combination.
    let any_wildcard = [
        &config.allowed_origins,
        &config.allowed_methods,
        &config.allowed_headers,
        &config.exposed_headers,
    ]
    .into_iter()
    .any(|values| is_wildcard(values));
    let credentials = config.allow_credentials && !any_wildcard;
    if config.allow_credentials && !credentials {
        tracing::error!("CORS wildcard configured with allow_credentials; credentials disabled");
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .expose_headers(exposed)
            .allow_credentials(credentials)
            .max_age(Duration::from_secs(config.max_age_secs)),
    )
}
