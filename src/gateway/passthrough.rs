//! Authenticated passthrough: a fixed path served from a fixed upstream.

use axum::{
    body::Body,
    http::header::CONTENT_TYPE,
    response::Response,
};
use tracing::debug;

use super::GatewayError;
use crate::config::PassthroughConfig;

/// Forwards `GET <path>` to the configured upstream URL.
#[derive(Debug, Clone)]
pub struct Passthrough {
    http: reqwest::Client,
    path: String,
    upstream_url: String,
}

impl Passthrough {
    /// Passthrough for `config`, or `None` when disabled.
    #[must_use]
    pub fn from_config(http: reqwest::Client, config: &PassthroughConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            http,
            path: config.path.clone(),
            upstream_url: config.upstream_url.clone(),
        })
    }

    /// Request path this passthrough answers.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fetch the upstream and stream its body back with its status and
    /// content type.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Upstream`] when the upstream cannot be reached.
    pub async fn forward(&self) -> Result<Response, GatewayError> {
        let upstream = self
            .http
            .get(&self.upstream_url)
            .send()
            .await
            .map_err(GatewayError::Upstream)?;

        debug!(upstream = %self.upstream_url, status = %upstream.status(), "Passthrough upstream answered");

        let mut builder = Response::builder().status(upstream.status());
        if let Some(content_type) = upstream.headers().get(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, content_type.clone());
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| GatewayError::Internal(e.to_string()))
    }
}
