//! Downstream health probes.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use serde_json::Value;

use crate::error::DependencyError;
use crate::http::{UpstreamClient, GATEWAY_ID};

const MAX_PROBE_BODY_BYTES: usize = 64 * 1024;

/// What a reachable dependency answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: u16,
    /// Parsed JSON body, or the raw text when it is not JSON.
    pub body: Value,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok` only for a 2xx answer; a non-2xx answer is `NonSuccessStatus`.
    async fn probe(&self) -> Result<ProbeReport, DependencyError>;
}

/// `GET {base_url}{health_path}` over the shared upstream client.
pub struct HttpProbe {
    client: UpstreamClient,
    url: String,
}

impl HttpProbe {
    pub fn new(client: UpstreamClient, base_url: &str, health_path: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), health_path),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> Result<ProbeReport, DependencyError> {
        let request = Request::get(self.url.as_str())
            .header(header::USER_AGENT, format!("{GATEWAY_ID}-health-check"))
            .body(Body::empty())
            .map_err(|e| DependencyError::Unreachable(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| DependencyError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DependencyError::NonSuccessStatus {
                status: status.as_u16(),
            });
        }

        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_PROBE_BODY_BYTES)
            .await
            .map_err(|e| DependencyError::InvalidResponse(e.to_string()))?;
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        Ok(ProbeReport {
            status: status.as_u16(),
            body,
        })
    }
}
