//! Trust store loading and refresh.
//!
//! Fetches a PEM CA bundle, with any CRLs it carries, from a blob source
//! and publishes it as an immutable [`TrustAnchorSet`] snapshot. Snapshots are swapped by
//! reference, so validations never observe a partially loaded set.

pub mod config;
pub mod refresh;
pub mod source;
pub mod store;

pub use config::TrustStoreConfig;
pub use refresh::spawn_refresh_task;
pub use source::source_for;
pub use store::{RefreshOutcome, TrustAnchorSet, TrustStore};
