//! Trust store configuration.

use serde::{Deserialize, Serialize};

/// Default periodic refresh interval in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300; // 5 minutes

/// CA bundle location and refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustStoreConfig {
    /// Location of the PEM bundle: an http(s) object URL or a file path.
    #[serde(default)]
    pub uri: Option<String>,

    /// Periodic refresh interval. Zero disables periodic refresh.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Upper bound on a single bundle fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_fetch_timeout() -> u64 {
    10
}

impl Default for TrustStoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            refresh_interval_secs: default_refresh_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl TrustStoreConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref uri) = self.uri {
            if uri.trim().is_empty() {
                return Err("truststore uri must not be empty".to_string());
            }
        }

        if self.fetch_timeout_secs == 0 {
            return Err("truststore fetch_timeout_secs must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrustStoreConfig::default();
        assert!(config.uri.is_none());
        assert_eq!(config.refresh_interval_secs, 300);
        assert_eq!(config.fetch_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_blank_uri() {
        let config = TrustStoreConfig {
            uri: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_fetch_timeout() {
        let config = TrustStoreConfig {
            uri: Some("/etc/edge/ca.pem".to_string()),
            fetch_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TrustStoreConfig =
            serde_json::from_str(r#"{"uri": "https://bucket.example.com/ca.pem"}"#).unwrap();
        assert_eq!(config.uri.as_deref(), Some("https://bucket.example.com/ca.pem"));
        assert_eq!(config.refresh_interval_secs, 300);
    }
}
