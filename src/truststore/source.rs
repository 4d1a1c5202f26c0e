//! Blob sources for the CA bundle.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

use super::store::TrustStoreError;

/// Raw bundle bytes plus the version the source reported for them.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    /// Opaque version identifier (ETag, object version, file stamp).
    pub version: Option<String>,
}

/// A versioned location the trust bundle is read from.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> &str;

    /// Fetch the current bundle.
    async fn fetch(&self) -> Result<Blob, TrustStoreError>;
}

/// Pick a source for a configured URI.
///
/// `http://` and `https://` URIs are fetched over HTTP; anything else is
/// treated as a local file path.
pub fn source_for(uri: &str, fetch_timeout: Duration) -> Result<Arc<dyn BlobSource>, TrustStoreError> {
    let uri = uri.trim();
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(Arc::new(HttpSource::new(uri.to_string(), fetch_timeout)?))
    } else {
        Ok(Arc::new(FileSource::new(PathBuf::from(uri), fetch_timeout)))
    }
}

/// Bundle stored in a local file, typically a mounted secret or volume.
pub struct FileSource {
    path: PathBuf,
    display: String,
    fetch_timeout: Duration,
}

impl FileSource {
    pub fn new(path: PathBuf, fetch_timeout: Duration) -> Self {
        let display = path.display().to_string();
        Self {
            path,
            display,
            fetch_timeout,
        }
    }

    async fn read(&self) -> Result<Blob, TrustStoreError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            TrustStoreError::Unavailable(format!("cannot stat {}: {}", self.display, e))
        })?;
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            TrustStoreError::Unavailable(format!("cannot read {}: {}", self.display, e))
        })?;

        // Length and mtime together stand in for an object version.
        let version = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| format!("{}-{}", bytes.len(), d.as_nanos()));

        Ok(Blob { bytes, version })
    }
}

#[async_trait]
impl BlobSource for FileSource {
    fn describe(&self) -> &str {
        &self.display
    }

    async fn fetch(&self) -> Result<Blob, TrustStoreError> {
        debug!(path = %self.display, "Reading trust bundle");
        tokio::time::timeout(self.fetch_timeout, self.read())
            .await
            .map_err(|_| {
                TrustStoreError::Unavailable(format!("timed out reading {}", self.display))
            })?
    }
}

/// Bundle served over HTTP, e.g. an object-store URL.
pub struct HttpSource {
    url: String,
    http_client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: String, fetch_timeout: Duration) -> Result<Self, TrustStoreError> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| TrustStoreError::Unavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { url, http_client })
    }
}

#[async_trait]
impl BlobSource for HttpSource {
    fn describe(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Blob, TrustStoreError> {
        debug!(url = %self.url, "Fetching trust bundle");

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TrustStoreError::Unavailable(format!("request to {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(TrustStoreError::Unavailable(format!(
                "{} returned status {}",
                self.url,
                response.status()
            )));
        }

        // Prefer an explicit object version over the ETag.
        let version = ["x-amz-version-id", "etag"]
            .iter()
            .find_map(|name| response.headers().get(*name))
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TrustStoreError::Unavailable(format!("reading body from {} failed: {}", self.url, e)))?;

        Ok(Blob {
            bytes: bytes.to_vec(),
            version,
        })
    }
}
