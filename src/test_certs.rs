//! Certificate and trust store fixtures shared by unit tests.

use async_trait::async_trait;
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams,
    CertificateRevocationListParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber,
};
use rustls_pki_types::CertificateDer;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::mtls::ClientCertificate;
use crate::truststore::source::{Blob, BlobSource};
use crate::truststore::store::TrustStoreError;
use crate::truststore::TrustStore;

/// OID 2.5.4.97, organizationIdentifier.
const ORGANIZATION_IDENTIFIER: [u64; 4] = [2, 5, 4, 97];

/// A certificate authority that can sign intermediates and leaves.
pub struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn root(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(name).self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn intermediate(&self, name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(name)
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        Self { cert, key }
    }

    /// An intermediate valid only between the given dates.
    pub fn intermediate_between(
        &self,
        name: &str,
        not_before: (i32, u8, u8),
        not_after: (i32, u8, u8),
    ) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = ca_params(name);
        params.not_before = date_time_ymd(not_before.0, not_before.1, not_before.2);
        params.not_after = date_time_ymd(not_after.0, not_after.1, not_after.2);
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn issue(&self, leaf: Leaf<'_>) -> IssuedLeaf {
        let key = KeyPair::generate().unwrap();
        let cert = leaf.params().signed_by(&key, &self.cert, &self.key).unwrap();
        IssuedLeaf { cert }
    }

    /// A PEM CRL signed by this authority revoking the given serials.
    pub fn crl_pem(&self, revoked: &[u64], crl_number: u64) -> String {
        let params = CertificateRevocationListParams {
            this_update: date_time_ymd(2020, 1, 1),
            next_update: date_time_ymd(2099, 1, 1),
            crl_number: SerialNumber::from(crl_number),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from(*serial),
                    revocation_time: date_time_ymd(2021, 1, 1),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params.signed_by(&self.cert, &self.key).unwrap().pem().unwrap()
    }
}

fn ca_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

/// Subject and validity for a client certificate.
#[derive(Debug, Clone, Copy)]
pub struct Leaf<'a> {
    pub common_name: Option<&'a str>,
    pub organization_identifier: Option<&'a str>,
    pub not_before: (i32, u8, u8),
    pub not_after: (i32, u8, u8),
    pub server_auth_only: bool,
    pub key_usages: &'a [KeyUsagePurpose],
    /// Random when unset.
    pub serial: Option<u64>,
}

/// Key usages the edge requires of a client certificate.
pub const CLIENT_KEY_USAGES: &[KeyUsagePurpose] = &[
    KeyUsagePurpose::DigitalSignature,
    KeyUsagePurpose::KeyEncipherment,
];

impl<'a> Leaf<'a> {
    /// A client certificate valid from 2020 to 2099.
    pub fn valid(common_name: &'a str, organization_identifier: &'a str) -> Self {
        Self {
            common_name: Some(common_name),
            organization_identifier: Some(organization_identifier),
            not_before: (2020, 1, 1),
            not_after: (2099, 1, 1),
            server_auth_only: false,
            key_usages: CLIENT_KEY_USAGES,
            serial: None,
        }
    }

    pub fn with_serial(self, serial: u64) -> Self {
        Self {
            serial: Some(serial),
            ..self
        }
    }

    pub fn expired(self) -> Self {
        Self {
            not_before: (2000, 1, 1),
            not_after: (2001, 1, 1),
            ..self
        }
    }

    pub fn not_yet_valid(self) -> Self {
        Self {
            not_before: (2090, 1, 1),
            not_after: (2099, 1, 1),
            ..self
        }
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = self.common_name {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Example Holdings");
        if let Some(org) = self.organization_identifier {
            params
                .distinguished_name
                .push(DnType::CustomDnType(ORGANIZATION_IDENTIFIER.to_vec()), org);
        }
        let (y, m, d) = self.not_before;
        params.not_before = date_time_ymd(y, m, d);
        let (y, m, d) = self.not_after;
        params.not_after = date_time_ymd(y, m, d);
        params.extended_key_usages = if self.server_auth_only {
            vec![ExtendedKeyUsagePurpose::ServerAuth]
        } else {
            vec![ExtendedKeyUsagePurpose::ClientAuth]
        };
        params.key_usages = self.key_usages.to_vec();
        params.serial_number = self.serial.map(SerialNumber::from);
        params
    }
}

/// A signed client certificate.
pub struct IssuedLeaf {
    cert: Certificate,
}

impl IssuedLeaf {
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn client_cert(&self) -> ClientCertificate {
        ClientCertificate::new(self.cert.der().clone(), Vec::new())
    }

    pub fn client_cert_with_chain(&self, chain: &[&TestCa]) -> ClientCertificate {
        ClientCertificate::new(
            self.cert.der().clone(),
            chain.iter().map(|ca| ca.der()).collect(),
        )
    }
}

/// A blob source that replays a fixed sequence of fetch results.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Blob, TrustStoreError>>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Result<(String, Option<&str>), TrustStoreError>>) -> Self {
        let script = steps
            .into_iter()
            .map(|step| {
                step.map(|(body, version)| Blob {
                    bytes: body.into_bytes(),
                    version: version.map(String::from),
                })
            })
            .collect();
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl BlobSource for ScriptedSource {
    fn describe(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self) -> Result<Blob, TrustStoreError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TrustStoreError::Unavailable("script exhausted".to_string())))
    }
}

/// A loaded trust store whose bundle holds the given authorities.
pub async fn trust_store_with(cas: &[&TestCa]) -> Arc<TrustStore> {
    let bundle: String = cas.iter().map(|ca| ca.pem()).collect();
    let source = ScriptedSource::new(vec![Ok((bundle, Some("test")))]);
    Arc::new(TrustStore::load(Arc::new(source)).await.unwrap())
}
