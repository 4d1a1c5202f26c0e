//! mTLS configuration.

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};

/// Client certificate hand-off and authorizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MtlsConfig {
    /// Header containing the client certificate (from the TLS edge).
    /// Default: X-Client-Cert
    #[serde(default = "default_cert_header")]
    pub client_cert_header: String,

    /// Header containing intermediates the client presented.
    /// Default: X-Client-Cert-Chain
    #[serde(default = "default_chain_header")]
    pub client_chain_header: String,

    /// Remote authorizer endpoint. When unset, certificates are validated
    /// in-process against the local trust store.
    #[serde(default)]
    pub authorizer_url: Option<String>,

    /// Upper bound on one authorization, after which the request is denied.
    #[serde(default = "default_authorize_timeout_ms")]
    pub authorize_timeout_ms: u64,

    /// Log certificate details for debugging.
    #[serde(default)]
    pub log_certs: bool,
}

fn default_cert_header() -> String {
    "X-Client-Cert".to_string()
}

fn default_chain_header() -> String {
    "X-Client-Cert-Chain".to_string()
}

fn default_authorize_timeout_ms() -> u64 {
    2000
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            client_cert_header: default_cert_header(),
            client_chain_header: default_chain_header(),
            authorizer_url: None,
            authorize_timeout_ms: default_authorize_timeout_ms(),
            log_certs: false,
        }
    }
}

impl MtlsConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        for header in [&self.client_cert_header, &self.client_chain_header] {
            if HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(format!("invalid certificate header name: {:?}", header));
            }
        }

        if self
            .client_cert_header
            .eq_ignore_ascii_case(&self.client_chain_header)
        {
            return Err("client_cert_header and client_chain_header must differ".to_string());
        }

        if let Some(ref url) = self.authorizer_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("authorizer_url must be an http(s) URL: {}", url));
            }
        }

        if self.authorize_timeout_ms == 0 {
            return Err("authorize_timeout_ms must be greater than zero".to_string());
        }

        Ok(())
    }
}
