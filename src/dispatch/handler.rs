//! Per-request edge dispatch.
//!
//! Every request goes through the same sequence: capture the certificate
//! handed over by the TLS edge, authorize it under a timeout, and either
//! deny with a bare 403 or rewrite the identity headers and forward.

use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::backend::{Backend, BackendError};
use crate::mtls::{
    AuthorizationDecision, Authorizer, CertificateDecodeError, ClientCertificate, DenialReason,
};
use crate::rewrite::{rewrite, RewriteRule};

/// Names of the headers the TLS edge uses to hand over the client
/// certificate.
#[derive(Debug, Clone)]
pub struct CertificateHandoff {
    cert_header: HeaderName,
    chain_header: HeaderName,
}

impl CertificateHandoff {
    pub fn new(cert_header: &str, chain_header: &str) -> Result<Self> {
        let parse = |name: &str| {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| anyhow!("invalid certificate header name: {:?}", name))
        };
        Ok(Self {
            cert_header: parse(cert_header)?,
            chain_header: parse(chain_header)?,
        })
    }

    /// Decode the certificate, if one was presented.
    pub fn capture(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<ClientCertificate>, CertificateDecodeError> {
        let text = |name: &HeaderName| {
            headers
                .get(name)
                .map(|v| v.to_str().map_err(|_| CertificateDecodeError::NotText))
                .transpose()
        };
        ClientCertificate::from_handoff(text(&self.cert_header)?, text(&self.chain_header)?)
    }

    /// Remove certificate material so the backend never receives it.
    pub fn strip(&self, headers: &mut HeaderMap) {
        headers.remove(&self.cert_header);
        headers.remove(&self.chain_header);
    }
}

/// Shared state of the edge listener.
#[derive(Clone)]
pub struct EdgeState {
    pub authorizer: Arc<dyn Authorizer>,
    pub backend: Arc<dyn Backend>,
    pub rules: Arc<[RewriteRule]>,
    pub handoff: Arc<CertificateHandoff>,
    pub authorize_timeout: Duration,
}

/// How a request left the edge.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Not authorized; the backend was not contacted.
    Denied(DenialReason),
    /// Backend response, passed through.
    Forwarded(Response<Body>),
    /// Authorized, but forwarding failed.
    BackendFailed(BackendError),
}

impl IntoResponse for DispatchOutcome {
    fn into_response(self) -> Response {
        match self {
            // Uniform for every reason. Extensions are not serialized.
            DispatchOutcome::Denied(reason) => {
                let mut response = StatusCode::FORBIDDEN.into_response();
                response.extensions_mut().insert(reason);
                response
            }
            DispatchOutcome::Forwarded(response) => response,
            DispatchOutcome::BackendFailed(BackendError::BodyTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE.into_response()
            }
            DispatchOutcome::BackendFailed(BackendError::Unavailable(_)) => {
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

/// Run one request through the edge.
pub async fn dispatch(state: &EdgeState, request: Request<Body>) -> DispatchOutcome {
    let (mut parts, body) = request.into_parts();

    let cert = match state.handoff.capture(&parts.headers) {
        Ok(cert) => cert,
        Err(e) => {
            // Material the edge vouched for but nobody can parse
            warn!(error = %e, "Client certificate hand-off could not be decoded");
            return DispatchOutcome::Denied(DenialReason::UntrustedIssuer);
        }
    };

    // Dropping this future on client disconnect abandons the authorization
    let decision =
        match tokio::time::timeout(state.authorize_timeout, state.authorizer.authorize(cert)).await
        {
            Ok(decision) => decision,
            Err(_) => {
                warn!(
                    timeout_ms = state.authorize_timeout.as_millis() as u64,
                    "Authorization timed out"
                );
                AuthorizationDecision::Deny(DenialReason::AuthorizationTimeout)
            }
        };

    let claims = match decision {
        AuthorizationDecision::Allow(claims) => claims,
        AuthorizationDecision::Deny(reason) => {
            info!(
                method = %parts.method,
                path = %parts.uri.path(),
                reason = %reason,
                "Request denied"
            );
            return DispatchOutcome::Denied(reason);
        }
    };

    debug!(
        common_name = %claims.common_name(),
        organization_identifier = %claims.organization_identifier(),
        verified = claims.is_verified(),
        "Request authorized"
    );

    state.handoff.strip(&mut parts.headers);
    parts.headers = rewrite(std::mem::take(&mut parts.headers), &claims, &state.rules);

    match state.backend.forward(Request::from_parts(parts, body)).await {
        Ok(response) => DispatchOutcome::Forwarded(response),
        Err(e) => {
            warn!(error = %e, "Forwarding to backend failed");
            DispatchOutcome::BackendFailed(e)
        }
    }
}

async fn handle(State(state): State<EdgeState>, request: Request<Body>) -> DispatchOutcome {
    dispatch(&state, request).await
}

/// Router for the edge listener. Every method and path is dispatched.
pub fn build_router(state: EdgeState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
        tracing::info_span!(
            "edge.request",
            method = %request.method(),
            path = %request.uri().path(),
            version = ?request.version()
        )
    });

    Router::new()
        .fallback(handle)
        .layer(trace_layer)
        .with_state(state)
}
