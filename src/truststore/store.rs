//! Trust anchor snapshots and the store that publishes them.

use arc_swap::ArcSwap;
use rustls_pki_types::{CertificateDer, CertificateRevocationListDer, TrustAnchor};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webpki::{CertRevocationList, OwnedCertRevocationList};

use super::source::BlobSource;

/// Trust store loading failures.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// The bundle could not be fetched.
    #[error("trust store unavailable: {0}")]
    Unavailable(String),
    /// The fetched bytes are not a non-empty sequence of PEM certificates.
    #[error("trust store malformed: {0}")]
    Malformed(String),
}

/// Immutable set of CA certificates valid for chain verification.
///
/// Roots and intermediates found in the bundle all act as anchors. CRLs
/// shipped in the same bundle belong to the same snapshot.
#[derive(Debug)]
pub struct TrustAnchorSet {
    anchors: Vec<TrustAnchor<'static>>,
    crls: Vec<CertRevocationList<'static>>,
    loaded_at: SystemTime,
    version: Option<String>,
}

impl TrustAnchorSet {
    /// Parse a PEM bundle.
    ///
    /// `X509 CRL` sections become revocation lists and other
    /// non-certificate sections are skipped. Every certificate and CRL
    /// section must parse, and at least one certificate must be present.
    pub fn from_pem(pem: &[u8], version: Option<String>) -> Result<Self, TrustStoreError> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<_, _>>()
            .map_err(|e| TrustStoreError::Malformed(format!("invalid PEM: {}", e)))?;

        if certs.is_empty() {
            return Err(TrustStoreError::Malformed(
                "no certificates in bundle".to_string(),
            ));
        }

        let mut anchors = Vec::with_capacity(certs.len());
        for (index, cert) in certs.iter().enumerate() {
            let anchor = webpki::anchor_from_trusted_cert(cert).map_err(|e| {
                TrustStoreError::Malformed(format!("certificate {} is not a valid anchor: {:?}", index, e))
            })?;
            anchors.push(anchor.to_owned());
        }

        let crl_ders: Vec<CertificateRevocationListDer<'static>> =
            rustls_pemfile::crls(&mut &pem[..])
                .collect::<Result<_, _>>()
                .map_err(|e| TrustStoreError::Malformed(format!("invalid PEM: {}", e)))?;

        let mut crls = Vec::with_capacity(crl_ders.len());
        for (index, der) in crl_ders.iter().enumerate() {
            let crl = OwnedCertRevocationList::from_der(der.as_ref()).map_err(|e| {
                TrustStoreError::Malformed(format!("CRL {} is not valid: {:?}", index, e))
            })?;
            crls.push(CertRevocationList::from(crl));
        }

        Ok(Self {
            anchors,
            crls,
            loaded_at: SystemTime::now(),
            version,
        })
    }

    pub fn anchors(&self) -> &[TrustAnchor<'static>] {
        &self.anchors
    }

    pub fn crls(&self) -> &[CertRevocationList<'static>] {
        &self.crls
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Updated(Arc<TrustAnchorSet>),
    /// The source reported the version already published.
    Unchanged(Arc<TrustAnchorSet>),
}

impl RefreshOutcome {
    pub fn snapshot(&self) -> &Arc<TrustAnchorSet> {
        match self {
            RefreshOutcome::Updated(set) | RefreshOutcome::Unchanged(set) => set,
        }
    }
}

/// Holds the published [`TrustAnchorSet`].
///
/// Readers load the current snapshot without locking. Refreshes are
/// serialized and only ever replace a snapshot with a complete one.
pub struct TrustStore {
    source: Arc<dyn BlobSource>,
    current: ArcSwap<TrustAnchorSet>,
    refresh_lock: Mutex<()>,
}

impl TrustStore {
    /// Perform the initial load. Failure here is fatal to startup.
    pub async fn load(source: Arc<dyn BlobSource>) -> Result<Self, TrustStoreError> {
        let blob = source.fetch().await?;
        let set = TrustAnchorSet::from_pem(&blob.bytes, blob.version)?;

        info!(
            source = %source.describe(),
            version = ?set.version(),
            anchors = set.len(),
            crls = set.crls().len(),
            "Trust store loaded"
        );

        Ok(Self {
            source,
            current: ArcSwap::from_pointee(set),
            refresh_lock: Mutex::new(()),
        })
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<TrustAnchorSet> {
        self.current.load_full()
    }

    pub fn describe(&self) -> &str {
        self.source.describe()
    }

    /// Re-fetch the bundle and publish it if it changed.
    ///
    /// On failure the previously published snapshot stays active.
    pub async fn refresh(&self) -> Result<RefreshOutcome, TrustStoreError> {
        let _guard = self.refresh_lock.lock().await;

        let blob = match self.source.fetch().await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "Trust store refresh failed, keeping last known good snapshot"
                );
                return Err(e);
            }
        };

        let current = self.snapshot();
        if blob.version.is_some() && blob.version.as_deref() == current.version() {
            debug!(version = ?current.version(), "Trust bundle unchanged");
            return Ok(RefreshOutcome::Unchanged(current));
        }

        let set = match TrustAnchorSet::from_pem(&blob.bytes, blob.version) {
            Ok(set) => Arc::new(set),
            Err(e) => {
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    kept_version = ?current.version(),
                    "Trust store refresh rejected, keeping last known good snapshot"
                );
                return Err(e);
            }
        };

        self.current.store(Arc::clone(&set));

        info!(
            source = %self.source.describe(),
            previous_version = ?current.version(),
            version = ?set.version(),
            anchors = set.len(),
            crls = set.crls().len(),
            "Trust store refreshed"
        );

        Ok(RefreshOutcome::Updated(set))
    }
}
