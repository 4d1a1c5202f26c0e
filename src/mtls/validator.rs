//! mTLS certificate validation.
//!
//! A pure function of the presented certificate, a trust snapshot and the
//! clock. Nothing here looks at the request itself.

use rustls_pki_types::UnixTime;
use std::time::Duration;
use tracing::debug;
use webpki::{
    CertRevocationList, EndEntityCert, KeyUsage, RevocationCheckDepth, RevocationOptions,
    RevocationOptionsBuilder, UnknownStatusPolicy, ALL_VERIFICATION_ALGS,
};
use x509_parser::der_parser::oid::Oid;
use x509_parser::oid_registry::OID_X509_COMMON_NAME;
use x509_parser::prelude::*;

use super::certificate::ClientCertificate;
use super::decision::{AuthorizationDecision, DenialReason, IdentityClaims};
use crate::truststore::TrustAnchorSet;

/// organizationIdentifier (X.520).
const ORGANIZATION_IDENTIFIER: &[u64] = &[2, 5, 4, 97];

/// Parsed certificate details for debug logging.
#[derive(Debug, Clone)]
pub struct CertificateSummary {
    /// Full Subject Distinguished Name.
    pub subject_dn: String,
    /// Issuer Distinguished Name.
    pub issuer_dn: String,
    /// Certificate serial number (hex).
    pub serial: String,
    /// Not valid before (Unix timestamp).
    pub not_before: i64,
    /// Not valid after (Unix timestamp).
    pub not_after: i64,
}

/// Authorize a presented certificate against a trust snapshot.
pub fn authorize(
    cert: Option<&ClientCertificate>,
    trust: &TrustAnchorSet,
    now: UnixTime,
) -> AuthorizationDecision {
    let cert = match cert {
        Some(cert) => cert,
        None => return AuthorizationDecision::Deny(DenialReason::NoCertificatePresented),
    };

    match verify(cert, trust, now) {
        Ok(claims) => AuthorizationDecision::Allow(claims),
        Err(reason) => AuthorizationDecision::Deny(reason),
    }
}

fn verify(
    cert: &ClientCertificate,
    trust: &TrustAnchorSet,
    now: UnixTime,
) -> Result<IdentityClaims, DenialReason> {
    let parsed = X509Certificate::from_der(cert.der()).map(|(_, parsed)| parsed);

    // Trust is settled before the clock or revocation is consulted, so a
    // chain that does not reach the snapshot is never reported as expired.
    if !chains_to_snapshot(cert, trust, now, parsed.as_ref().ok()) {
        return Err(DenialReason::UntrustedIssuer);
    }

    let crls: Vec<&CertRevocationList<'_>> = trust.crls().iter().collect();
    let revocation = RevocationOptionsBuilder::new(&crls).ok().map(|builder| {
        builder
            .with_depth(RevocationCheckDepth::Chain)
            .with_status_policy(UnknownStatusPolicy::Allow)
            .build()
    });

    verify_chain(cert, trust, now, revocation).map_err(|e| match e {
        webpki::Error::CertExpired => DenialReason::Expired,
        webpki::Error::CertNotValidYet => DenialReason::NotYetValid,
        webpki::Error::CertRevoked => {
            debug!("Client certificate is revoked");
            DenialReason::Revoked
        }
        other => {
            debug!(error = ?other, "Client certificate chain verification failed");
            DenialReason::UntrustedIssuer
        }
    })?;

    let parsed = parsed.map_err(|e| {
        debug!(error = %e, "Trusted certificate could not be parsed for attributes");
        DenialReason::AttributeExtractionFailed
    })?;

    check_key_usage(&parsed)?;
    extract_claims(&parsed)
}

/// Whether some path from the leaf reaches a snapshot anchor at a moment
/// when every certificate on it is in date.
///
/// A path is in date from the latest notBefore among its certificates, so
/// the clock and each presented notBefore are the only instants to try.
fn chains_to_snapshot(
    cert: &ClientCertificate,
    trust: &TrustAnchorSet,
    now: UnixTime,
    leaf: Option<&X509Certificate<'_>>,
) -> bool {
    let presented = cert
        .intermediates()
        .iter()
        .filter_map(|der| X509Certificate::from_der(der).ok())
        .map(|(_, parsed)| parsed.validity().not_before.timestamp());

    let mut instants: Vec<u64> = leaf
        .map(|leaf| leaf.validity().not_before.timestamp())
        .into_iter()
        .chain(presented)
        .map(|secs| u64::try_from(secs).unwrap_or(0))
        .collect();
    instants.sort_unstable();
    instants.dedup();

    std::iter::once(now)
        .chain(
            instants
                .into_iter()
                .map(|secs| UnixTime::since_unix_epoch(Duration::from_secs(secs))),
        )
        .any(|at| verify_chain(cert, trust, at, None).is_ok())
}

fn verify_chain(
    cert: &ClientCertificate,
    trust: &TrustAnchorSet,
    time: UnixTime,
    revocation: Option<RevocationOptions<'_>>,
) -> Result<(), webpki::Error> {
    let end_entity = EndEntityCert::try_from(cert.der())?;

    end_entity
        .verify_for_usage(
            ALL_VERIFICATION_ALGS,
            trust.anchors(),
            cert.intermediates(),
            time,
            KeyUsage::client_auth(),
            revocation,
            None,
        )
        .map(|_| ())
}

/// Client certificates must allow both digitalSignature and
/// keyEncipherment. A missing extension allows neither.
fn check_key_usage(cert: &X509Certificate<'_>) -> Result<(), DenialReason> {
    match cert.key_usage() {
        Ok(Some(ext)) if ext.value.digital_signature() && ext.value.key_encipherment() => Ok(()),
        Ok(ext) => {
            debug!(
                key_usage = ?ext.map(|ext| ext.value.to_string()),
                "Client certificate key usage not permitted"
            );
            Err(DenialReason::KeyUsageNotPermitted)
        }
        Err(e) => {
            debug!(error = %e, "Client certificate key usage is malformed");
            Err(DenialReason::KeyUsageNotPermitted)
        }
    }
}

fn extract_claims(cert: &X509Certificate<'_>) -> Result<IdentityClaims, DenialReason> {
    let subject = cert.subject();
    let organization_identifier_oid = Oid::from(ORGANIZATION_IDENTIFIER)
        .map_err(|_| DenialReason::AttributeExtractionFailed)?;

    let common_name = first_attribute(subject, &OID_X509_COMMON_NAME)?;
    let organization_identifier = first_attribute(subject, &organization_identifier_oid)?;

    Ok(IdentityClaims::verified(common_name, organization_identifier))
}

/// First value of an attribute type; absent attributes are empty.
fn first_attribute(name: &X509Name<'_>, oid: &Oid<'static>) -> Result<String, DenialReason> {
    let attribute = match name.iter_by_oid(oid).next() {
        Some(attribute) => attribute,
        None => return Ok(String::new()),
    };

    let value = attribute.as_str().map_err(|e| {
        debug!(oid = %oid, error = %e, "Subject attribute is not a string");
        DenialReason::AttributeExtractionFailed
    })?;

    // Must be representable as an HTTP header value
    if !is_header_safe(value) {
        debug!(oid = %oid, "Subject attribute contains control characters");
        return Err(DenialReason::AttributeExtractionFailed);
    }

    Ok(value.to_string())
}

pub(crate) fn is_header_safe(value: &str) -> bool {
    !value.chars().any(char::is_control)
}

/// Summarize a certificate for logs. Returns `None` if it does not parse.
pub fn summarize(cert: &ClientCertificate) -> Option<CertificateSummary> {
    let (_, parsed) = X509Certificate::from_der(cert.der()).ok()?;

    let serial = parsed
        .serial
        .to_bytes_be()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");

    Some(CertificateSummary {
        subject_dn: parsed.subject().to_string(),
        issuer_dn: parsed.issuer().to_string(),
        serial,
        not_before: parsed.validity().not_before.timestamp(),
        not_after: parsed.validity().not_after.timestamp(),
    })
}
