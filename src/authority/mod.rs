//! Certificate authority subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     ca.rs (load root certificate + key once, shared read-only)
//!
//! Per CONNECT tunnel:
//!     issuer.rs (fresh key pair → leaf for the target host → rustls ServerConfig)
//!     → TLS handshake on the hijacked socket
//!     → leaf dropped when the tunnel closes
//! ```
//!
//! # Design Decisions
//! - No leaf cache: every tunnel mints and owns its own certificate
//! - The root key never leaves this module after loading

pub mod ca;
pub mod issuer;

pub use ca::{CaError, RootAuthority};
pub use issuer::{issue, CertificateError, LeafCertificate};
