//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (CONNECT only, authenticate, mint leaf, 200, upgrade)
//!     → tunnel.rs (client TLS handshake, HTTP/1.1 over the tunnel)
//!     → pipeline.rs (admission, destination rewrite, header injection)
//!     → forward.rs (TLS to origin, bounded timeouts)
//!     → origin response relayed back down the tunnel
//! ```

pub mod error;
pub mod forward;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod tunnel;

pub use error::{ForwardingError, ProxyError};
pub use forward::{ForwardTimeouts, Forwarder, Upstream};
pub use pipeline::RequestPipeline;
pub use request::ConnectTarget;
pub use server::{ProxyServer, ProxyState};
