//! Authorizers: where a presented certificate gets its decision.
//!
//! [`LocalAuthorizer`] validates in-process against the trust store.
//! [`RemoteAuthorizer`] delegates to another instance's control endpoint
//! over HTTP and fails closed when that endpoint cannot be reached.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rustls_pki_types::UnixTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::certificate::ClientCertificate;
use super::decision::{AuthorizationDecision, DenialReason, IdentityClaims};
use super::validator::{self, is_header_safe};
use crate::truststore::TrustStore;

/// Produces one decision per request.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, cert: Option<ClientCertificate>) -> AuthorizationDecision;
}

/// Validates certificates against the local trust store snapshot.
pub struct LocalAuthorizer {
    store: Arc<TrustStore>,
    log_certs: bool,
}

impl LocalAuthorizer {
    pub fn new(store: Arc<TrustStore>, log_certs: bool) -> Self {
        Self { store, log_certs }
    }
}

#[async_trait]
impl Authorizer for LocalAuthorizer {
    async fn authorize(&self, cert: Option<ClientCertificate>) -> AuthorizationDecision {
        if self.log_certs {
            if let Some(summary) = cert.as_ref().and_then(validator::summarize) {
                debug!(
                    subject = %summary.subject_dn,
                    issuer = %summary.issuer_dn,
                    serial = %summary.serial,
                    not_before = summary.not_before,
                    not_after = summary.not_after,
                    "Client certificate presented"
                );
            }
        }

        // One snapshot per decision, so a concurrent refresh cannot mix sets
        let snapshot = self.store.snapshot();
        validator::authorize(cert.as_ref(), &snapshot, UnixTime::now())
    }
}

/// Request body for the authorize endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub client_cert_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_chain_pem: Option<String>,
}

impl AuthorizeRequest {
    pub fn from_certificate(cert: &ClientCertificate) -> Self {
        Self {
            client_cert_pem: cert.to_pem(),
            client_cert_chain_pem: cert.chain_pem(),
        }
    }
}

/// Response body of the authorize endpoint.
///
/// `isAuthorized` is written as a JSON bool. Authorizers that answer with
/// the strings `"true"` or `"false"` are understood too; any other value
/// fails to parse and the request is denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    #[serde(deserialize_with = "bool_or_string")]
    pub is_authorized: bool,
    #[serde(default)]
    pub context: AuthorizerContext,
}

/// Identity context returned with a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerContext {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub common_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub organization_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Str(other),
                &"true or false",
            )),
        },
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl AuthorizeResponse {
    pub fn from_decision(decision: &AuthorizationDecision) -> Self {
        let claims = decision.claims();
        Self {
            is_authorized: decision.is_allowed(),
            context: AuthorizerContext {
                common_name: claims.common_name().to_string(),
                organization_identifier: claims.organization_identifier().to_string(),
                denial_reason: decision.denial_reason(),
                exception: decision
                    .denial_reason()
                    .map(|reason| format!("certificate rejected: {}", reason)),
            },
        }
    }

    /// Interpret a remote answer.
    ///
    /// A deny without a reason is reported as an untrusted issuer. Claims
    /// that cannot travel as header values are refused.
    pub fn into_decision(self) -> AuthorizationDecision {
        if !self.is_authorized {
            return AuthorizationDecision::Deny(
                self.context
                    .denial_reason
                    .unwrap_or(DenialReason::UntrustedIssuer),
            );
        }

        let AuthorizerContext {
            common_name,
            organization_identifier,
            ..
        } = self.context;

        if !is_header_safe(&common_name) || !is_header_safe(&organization_identifier) {
            return AuthorizationDecision::Deny(DenialReason::AttributeExtractionFailed);
        }

        AuthorizationDecision::Allow(IdentityClaims::verified(
            common_name,
            organization_identifier,
        ))
    }
}

/// Delegates decisions to a remote authorize endpoint.
pub struct RemoteAuthorizer {
    url: String,
    http_client: reqwest::Client,
}

impl RemoteAuthorizer {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { url, http_client })
    }

    async fn call(&self, request: &AuthorizeRequest) -> Result<AuthorizeResponse> {
        let response = self
            .http_client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .context("Failed to reach authorizer")?
            .error_for_status()
            .context("Authorizer returned error status")?;

        response
            .json::<AuthorizeResponse>()
            .await
            .context("Failed to parse authorizer response")
    }
}

#[async_trait]
impl Authorizer for RemoteAuthorizer {
    async fn authorize(&self, cert: Option<ClientCertificate>) -> AuthorizationDecision {
        let cert = match cert {
            Some(cert) => cert,
            None => return AuthorizationDecision::Deny(DenialReason::NoCertificatePresented),
        };

        match self.call(&AuthorizeRequest::from_certificate(&cert)).await {
            Ok(response) => response.into_decision(),
            Err(e) => {
                warn!(url = %self.url, error = %format!("{:#}", e), "Remote authorization failed");
                AuthorizationDecision::Deny(DenialReason::AuthorizerUnavailable)
            }
        }
    }
}
