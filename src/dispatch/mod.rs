//! Edge dispatch: the public listener that authorizes and forwards, and
//! the control listener beside it.

pub mod backend;
pub mod config;
pub mod control;
pub mod handler;

pub use backend::HttpBackend;
pub use config::BackendConfig;
pub use control::{build_control_router, ControlState};
pub use handler::{build_router, CertificateHandoff, EdgeState};
