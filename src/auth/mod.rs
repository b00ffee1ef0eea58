//! Tunnel authentication subsystem.
//!
//! # Data Flow
//! ```text
//! CONNECT request
//!     → credential.rs (Proxy-Authorization → tenant, secret, config)
//!     → authenticator.rs (validate secret, resolve configuration, build limit)
//!     → TunnelContext handed to the tunnel for its whole lifetime
//! ```
//!
//! # Design Decisions
//! - Runs once per tunnel, before the socket is hijacked
//! - Client mistakes (4xx) and store failures (5xx) stay distinct end to end

pub mod authenticator;
pub mod credential;

pub use authenticator::{AuthError, TunnelAuthenticator, TunnelContext};
pub use credential::{parse_credential, AuthCredential, CredentialError};
