//! Forwarding allowed requests to the backend.

use anyhow::Context;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwarding failures after a request was allowed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The protected service.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, BackendError>;
}

/// Forwards over HTTP to a fixed base URL.
pub struct HttpBackend {
    base_url: String,
    max_body_bytes: usize,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration, max_body_bytes: usize) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            max_body_bytes,
            http_client,
        })
    }

    fn target(&self, request: &Request<Body>) -> String {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, BackendError> {
        let url = self.target(&request);
        let (parts, body) = request.into_parts();

        let body = to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| BackendError::BodyTooLarge {
                limit: self.max_body_bytes,
            })?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        // Recomputed by the client for the buffered body
        headers.remove(header::CONTENT_LENGTH);

        debug!(method = %parts.method, url = %url, "Forwarding request to backend");

        let response = self
            .http_client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let mut out = Response::new(Body::from(bytes));
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by Connection are connection-scoped too
    let named: Vec<header::HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| header::HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
