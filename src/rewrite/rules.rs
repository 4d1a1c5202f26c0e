use anyhow::{anyhow, bail, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::mtls::IdentityClaims;

/// Claim a header is populated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimField {
    CommonName,
    OrganizationIdentifier,
}

impl ClaimField {
    pub fn read<'a>(&self, claims: &'a IdentityClaims) -> &'a str {
        match self {
            ClaimField::CommonName => claims.common_name(),
            ClaimField::OrganizationIdentifier => claims.organization_identifier(),
        }
    }
}

/// A rewrite rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteRuleConfig {
    pub header: String,
    pub claim: ClaimField,
}

/// A validated rewrite rule.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    header: HeaderName,
    claim: ClaimField,
}

impl RewriteRule {
    pub fn new(header: &str, claim: ClaimField) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| anyhow!("invalid rewrite header name: {:?}", header))?;
        Ok(Self { header, claim })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    pub fn claim(&self) -> ClaimField {
        self.claim
    }
}

/// The identity headers forwarded by default.
pub fn default_rule_configs() -> Vec<RewriteRuleConfig> {
    vec![
        RewriteRuleConfig {
            header: "OrganizationIdentifier".to_string(),
            claim: ClaimField::OrganizationIdentifier,
        },
        RewriteRuleConfig {
            header: "CommonName".to_string(),
            claim: ClaimField::CommonName,
        },
    ]
}

/// Validate configured rules. Header names compare case-insensitively, so
/// two rules differing only in case are duplicates.
pub fn compile(configs: &[RewriteRuleConfig]) -> Result<Vec<RewriteRule>> {
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(configs.len());

    for config in configs {
        let rule = RewriteRule::new(&config.header, config.claim)?;
        if !seen.insert(rule.header.clone()) {
            bail!("duplicate rewrite header: {}", config.header);
        }
        rules.push(rule);
    }

    Ok(rules)
}

/// Overwrite every rule's header with its claim.
///
/// All client-supplied values under a rule's name are removed, whatever
/// their case or count. Unverified claims produce empty values.
pub fn rewrite(mut headers: HeaderMap, claims: &IdentityClaims, rules: &[RewriteRule]) -> HeaderMap {
    for rule in rules {
        let value = HeaderValue::from_bytes(rule.claim.read(claims).as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static(""));
        // insert drops every existing value for the name
        headers.insert(rule.header.clone(), value);
    }
    headers
}
