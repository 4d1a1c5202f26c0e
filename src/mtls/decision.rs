//! Authorization decisions and verified identity claims.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a request was denied.
///
/// Every reason maps to the same client-visible response; the distinction
/// only reaches logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    NoCertificatePresented,
    UntrustedIssuer,
    Expired,
    NotYetValid,
    /// Listed on a CRL carried by the trust bundle.
    Revoked,
    /// Key usage does not allow digitalSignature and keyEncipherment.
    KeyUsageNotPermitted,
    AttributeExtractionFailed,
    AuthorizationTimeout,
    AuthorizerUnavailable,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::NoCertificatePresented => "NoCertificatePresented",
            DenialReason::UntrustedIssuer => "UntrustedIssuer",
            DenialReason::Expired => "Expired",
            DenialReason::NotYetValid => "NotYetValid",
            DenialReason::Revoked => "Revoked",
            DenialReason::KeyUsageNotPermitted => "KeyUsageNotPermitted",
            DenialReason::AttributeExtractionFailed => "AttributeExtractionFailed",
            DenialReason::AuthorizationTimeout => "AuthorizationTimeout",
            DenialReason::AuthorizerUnavailable => "AuthorizerUnavailable",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static UNVERIFIED: IdentityClaims = IdentityClaims {
    common_name: String::new(),
    organization_identifier: String::new(),
    verified: false,
};

/// Identity extracted from a client certificate.
///
/// Unverified claims always read as empty, whatever was stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    common_name: String,
    organization_identifier: String,
    verified: bool,
}

impl IdentityClaims {
    pub(crate) fn verified(common_name: String, organization_identifier: String) -> Self {
        Self {
            common_name,
            organization_identifier,
            verified: true,
        }
    }

    pub fn common_name(&self) -> &str {
        if self.verified {
            &self.common_name
        } else {
            ""
        }
    }

    pub fn organization_identifier(&self) -> &str {
        if self.verified {
            &self.organization_identifier
        } else {
            ""
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }
}

/// Outcome of authorizing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allow(IdentityClaims),
    Deny(DenialReason),
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allow(_))
    }

    /// Claims for an allowed request, the unverified zero value otherwise.
    pub fn claims(&self) -> &IdentityClaims {
        match self {
            AuthorizationDecision::Allow(claims) => claims,
            AuthorizationDecision::Deny(_) => &UNVERIFIED,
        }
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            AuthorizationDecision::Allow(_) => None,
            AuthorizationDecision::Deny(reason) => Some(*reason),
        }
    }
}
