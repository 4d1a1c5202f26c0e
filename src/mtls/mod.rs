//! mTLS client certificate authorization.
//!
//! Decides whether the certificate handed over by the TLS-terminating edge
//! chains to the trust store, and extracts the identity it carries.

pub mod authorizer;
pub mod certificate;
pub mod config;
pub mod decision;
pub mod validator;

pub use authorizer::{
    AuthorizeRequest, AuthorizeResponse, Authorizer, LocalAuthorizer, RemoteAuthorizer,
};
pub use certificate::{CertificateDecodeError, ClientCertificate};
pub use config::MtlsConfig;
pub use decision::{AuthorizationDecision, DenialReason, IdentityClaims};
