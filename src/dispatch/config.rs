//! Backend configuration.

use serde::{Deserialize, Serialize};

/// Where allowed requests are forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. `http://127.0.0.1:3000`.
    #[serde(default)]
    pub url: Option<String>,

    /// Timeout for one forwarded request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Largest request body buffered for forwarding.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl BackendConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        match self.url {
            None => return Err("backend url is required".to_string()),
            Some(ref url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(format!("backend url must be an http(s) URL: {}", url));
            }
            Some(_) => {}
        }

        if self.timeout_secs == 0 {
            return Err("backend timeout_secs must be greater than zero".to_string());
        }

        Ok(())
    }
}
