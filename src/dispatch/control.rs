//! Control listener: remote authorize endpoint, trust store operations
//! and health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::mtls::{
    AuthorizationDecision, AuthorizeRequest, AuthorizeResponse, Authorizer, ClientCertificate,
    DenialReason,
};
use crate::truststore::{RefreshOutcome, TrustAnchorSet, TrustStore};

#[derive(Clone)]
pub struct ControlState {
    pub authorizer: Arc<dyn Authorizer>,
    /// Absent when decisions are delegated to a remote authorizer.
    pub trust_store: Option<Arc<TrustStore>>,
}

#[derive(Debug, Serialize)]
struct TrustStoreSummary {
    version: Option<String>,
    anchors: usize,
    crls: usize,
    loaded_at: u64,
}

impl TrustStoreSummary {
    fn of(set: &TrustAnchorSet) -> Self {
        Self {
            version: set.version().map(String::from),
            anchors: set.len(),
            crls: set.crls().len(),
            loaded_at: set
                .loaded_at()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Serialize)]
struct RefreshSummary {
    outcome: &'static str,
    version: Option<String>,
    anchors: usize,
    crls: usize,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn authorize(
    State(state): State<ControlState>,
    Json(request): Json<AuthorizeRequest>,
) -> Json<AuthorizeResponse> {
    let decision = match ClientCertificate::from_handoff(
        Some(&request.client_cert_pem),
        request.client_cert_chain_pem.as_deref(),
    ) {
        Ok(cert) => state.authorizer.authorize(cert).await,
        Err(e) => {
            warn!(error = %e, "Authorize request carried an undecodable certificate");
            AuthorizationDecision::Deny(DenialReason::UntrustedIssuer)
        }
    };

    Json(AuthorizeResponse::from_decision(&decision))
}

async fn truststore_summary(State(state): State<ControlState>) -> Response {
    match state.trust_store {
        Some(store) => Json(TrustStoreSummary::of(&store.snapshot())).into_response(),
        None => error(StatusCode::NOT_FOUND, "no local trust store"),
    }
}

async fn truststore_refresh(State(state): State<ControlState>) -> Response {
    let store = match state.trust_store {
        Some(store) => store,
        None => return error(StatusCode::NOT_FOUND, "no local trust store"),
    };

    match store.refresh().await {
        Ok(outcome) => {
            let label = match &outcome {
                RefreshOutcome::Updated(_) => "updated",
                RefreshOutcome::Unchanged(_) => "unchanged",
            };
            let set = outcome.snapshot();
            Json(RefreshSummary {
                outcome: label,
                version: set.version().map(String::from),
                anchors: set.len(),
                crls: set.crls().len(),
            })
            .into_response()
        }
        Err(e) => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

pub fn build_control_router(state: ControlState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/authorize", post(authorize))
        .route("/truststore", get(truststore_summary))
        .route("/truststore/refresh", post(truststore_refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
