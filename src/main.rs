//! mTLS Identity Edge
//!
//! Sits behind a TLS-terminating edge, authorizes each request by the client
//! certificate the edge hands over, and forwards allowed requests to the
//! backend with authoritative identity headers.

mod dispatch;
mod mtls;
mod rewrite;
mod truststore;

#[cfg(test)]
mod test_certs;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use dispatch::{
    build_control_router, build_router, BackendConfig, CertificateHandoff, ControlState,
    EdgeState, HttpBackend,
};
use mtls::{Authorizer, LocalAuthorizer, MtlsConfig, RemoteAuthorizer};
use rewrite::{compile, default_rule_configs, RewriteRuleConfig};
use truststore::{source_for, spawn_refresh_task, TrustStore, TrustStoreConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "mtls-identity-edge")]
#[command(about = "Client certificate authorization edge for HTTP backends")]
struct Args {
    /// Address of the edge listener
    #[arg(long, default_value = "0.0.0.0:8080", env = "EDGE_LISTEN")]
    listen: SocketAddr,

    /// Address of the control listener (disabled when unset)
    #[arg(long, env = "CONTROL_LISTEN")]
    control_listen: Option<SocketAddr>,

    /// JSON configuration file
    #[arg(long, env = "EDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Trust bundle location (http(s) URL or file path)
    #[arg(long, env = "TRUSTSTORE_URI")]
    truststore: Option<String>,

    /// Backend base URL
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// Remote authorizer endpoint
    #[arg(long, env = "AUTHORIZER_URL")]
    authorizer_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "EDGE_VERBOSE")]
    verbose: bool,
}

/// Full edge configuration, as read from the JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EdgeConfig {
    #[serde(default)]
    truststore: TrustStoreConfig,

    #[serde(default)]
    mtls: MtlsConfig,

    /// Identity headers written for allowed requests.
    #[serde(default = "default_rule_configs")]
    rewrite: Vec<RewriteRuleConfig>,

    #[serde(default)]
    backend: BackendConfig,
}

impl EdgeConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Build configuration from the optional file, then apply CLI overrides.
    fn from_args(args: &Args) -> Result<Self> {
        let mut config = match args.config {
            Some(ref path) => Self::load(path)?,
            None => Self {
                rewrite: default_rule_configs(),
                ..Default::default()
            },
        };

        if let Some(ref uri) = args.truststore {
            config.truststore.uri = Some(uri.clone());
        }
        if let Some(ref url) = args.backend_url {
            config.backend.url = Some(url.clone());
        }
        if let Some(ref url) = args.authorizer_url {
            config.mtls.authorizer_url = Some(url.clone());
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.truststore.validate().map_err(|e| anyhow!(e))?;
        self.mtls.validate().map_err(|e| anyhow!(e))?;
        self.backend.validate().map_err(|e| anyhow!(e))?;
        compile(&self.rewrite)?;

        if self.truststore.uri.is_none() && self.mtls.authorizer_url.is_none() {
            return Err(anyhow!(
                "either a truststore uri or an authorizer_url must be configured"
            ));
        }

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Resolves once shutdown was signalled. Shared by both listeners.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also means shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},tower_http=info",
            env!("CARGO_CRATE_NAME"),
            log_level
        ))
        .json()
        .init();

    info!("Starting mTLS identity edge");

    // Build configuration
    let config = EdgeConfig::from_args(&args)?;

    info!(
        truststore = ?config.truststore.uri,
        authorizer_url = ?config.mtls.authorizer_url,
        backend_url = ?config.backend.url,
        rewrite_rules = config.rewrite.len(),
        "Configuration loaded"
    );

    // Initial trust store load; failure here is fatal
    let trust_store = match config.truststore.uri {
        Some(ref uri) => {
            let source = source_for(
                uri,
                Duration::from_secs(config.truststore.fetch_timeout_secs),
            )?;
            let store = TrustStore::load(source)
                .await
                .context("Initial trust store load failed")?;
            Some(Arc::new(store))
        }
        None => None,
    };

    let _refresh_handle = trust_store.as_ref().and_then(|store| {
        if config.truststore.refresh_interval_secs == 0 {
            info!("Trust store refresh disabled");
            return None;
        }
        info!(
            interval_secs = config.truststore.refresh_interval_secs,
            "Starting trust store refresh task"
        );
        Some(spawn_refresh_task(
            Arc::clone(store),
            config.truststore.refresh_interval_secs,
        ))
    });

    let authorize_timeout = Duration::from_millis(config.mtls.authorize_timeout_ms);
    let authorizer: Arc<dyn Authorizer> = match (&config.mtls.authorizer_url, &trust_store) {
        (Some(url), _) => {
            info!(url = %url, "Delegating authorization to remote authorizer");
            Arc::new(RemoteAuthorizer::new(url.clone(), authorize_timeout)?)
        }
        (None, Some(store)) => Arc::new(LocalAuthorizer::new(
            Arc::clone(store),
            config.mtls.log_certs,
        )),
        (None, None) => return Err(anyhow!("no authorizer configured")),
    };

    let backend_url = config
        .backend
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("backend url is required"))?;
    let backend = HttpBackend::new(
        backend_url,
        Duration::from_secs(config.backend.timeout_secs),
        config.backend.max_body_bytes,
    )?;

    let rules = compile(&config.rewrite)?;
    for rule in &rules {
        info!(header = %rule.header(), claim = ?rule.claim(), "Identity header rule");
    }

    let state = EdgeState {
        authorizer: Arc::clone(&authorizer),
        backend: Arc::new(backend),
        rules: rules.into(),
        handoff: Arc::new(CertificateHandoff::new(
            &config.mtls.client_cert_header,
            &config.mtls.client_chain_header,
        )?),
        authorize_timeout,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Control listener
    let control = match args.control_listen {
        Some(addr) => {
            let router = build_control_router(ControlState {
                authorizer: Arc::clone(&authorizer),
                trust_store: trust_store.clone(),
            });
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind control listener on {}", addr))?;
            info!(addr = %addr, "Starting control listener");
            let shutdown = wait_for_shutdown(shutdown_rx.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    warn!(error = %e, "Control listener stopped");
                }
            }))
        }
        None => None,
    };

    // Edge listener
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind edge listener on {}", args.listen))?;
    info!(addr = %args.listen, backend = %backend_url, "Starting edge listener");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .context("Edge listener failed")?;

    if let Some(control) = control {
        if let Err(e) = control.await {
            warn!(error = %e, "Control listener task failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["mtls-identity-edge"];
        full.extend_from_slice(argv);
        Args::parse_from(full)
    }

    #[test]
    fn test_cli_only_config() {
        let config = EdgeConfig::from_args(&args(&[
            "--truststore",
            "/etc/edge/truststore.pem",
            "--backend-url",
            "http://127.0.0.1:3000",
        ]))
        .unwrap();

        assert_eq!(config.truststore.uri.as_deref(), Some("/etc/edge/truststore.pem"));
        assert_eq!(config.rewrite, default_rule_configs());
        assert_eq!(config.mtls.client_cert_header, "X-Client-Cert");
    }

    #[test]
    fn test_file_config_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "truststore": {{"uri": "https://bucket.example.com/truststore.pem", "refresh_interval_secs": 60}},
                "mtls": {{"authorize_timeout_ms": 500}},
                "rewrite": [{{"header": "X-Org", "claim": "organizationIdentifier"}}],
                "backend": {{"url": "http://10.0.0.5:8080"}}
            }}"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = EdgeConfig::from_args(&args(&[
            "--config",
            &path,
            "--backend-url",
            "http://127.0.0.1:3000",
        ]))
        .unwrap();

        assert_eq!(config.truststore.refresh_interval_secs, 60);
        assert_eq!(config.mtls.authorize_timeout_ms, 500);
        assert_eq!(config.rewrite.len(), 1);
        assert_eq!(config.backend.url.as_deref(), Some("http://127.0.0.1:3000"));
    }

    #[test]
    fn test_file_without_rewrite_uses_defaults() {
        let config: EdgeConfig = serde_json::from_str(r#"{"backend": {"url": "http://b"}}"#).unwrap();
        assert_eq!(config.rewrite, default_rule_configs());
    }

    #[test]
    fn test_requires_a_way_to_authorize() {
        let result = EdgeConfig::from_args(&args(&["--backend-url", "http://127.0.0.1:3000"]));
        assert!(result.is_err());

        let config = EdgeConfig::from_args(&args(&[
            "--backend-url",
            "http://127.0.0.1:3000",
            "--authorizer-url",
            "http://authorizer.internal/authorize",
        ]))
        .unwrap();
        assert!(config.truststore.uri.is_none());
    }

    #[test]
    fn test_rejects_invalid_sections() {
        let result = EdgeConfig::from_args(&args(&["--truststore", "/etc/edge/truststore.pem"]));
        assert!(result.is_err(), "backend url is required");

        let config = EdgeConfig {
            truststore: TrustStoreConfig {
                uri: Some("/etc/edge/truststore.pem".to_string()),
                ..Default::default()
            },
            backend: BackendConfig {
                url: Some("http://127.0.0.1:3000".to_string()),
                ..Default::default()
            },
            rewrite: vec![
                RewriteRuleConfig {
                    header: "CommonName".to_string(),
                    claim: rewrite::rules::ClaimField::CommonName,
                },
                RewriteRuleConfig {
                    header: "commonname".to_string(),
                    claim: rewrite::rules::ClaimField::OrganizationIdentifier,
                },
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<EdgeConfig, _> =
            serde_json::from_str(r#"{"backend": {"url": "http://b"}, "jwt": {}}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_listener() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut servers = Vec::new();
        for _ in 0..2 {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let shutdown = wait_for_shutdown(shutdown_rx.clone());
            servers.push(tokio::spawn(async move {
                axum::serve(listener, axum::Router::new())
                    .with_graceful_shutdown(shutdown)
                    .await
            }));
        }

        tokio::task::yield_now().await;
        assert!(servers.iter().all(|server| !server.is_finished()));

        shutdown_tx.send(true).unwrap();
        for server in servers {
            tokio::time::timeout(Duration::from_secs(5), server)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }
}
