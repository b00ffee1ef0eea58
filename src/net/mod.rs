//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS on the listener itself)
//!     → Hand off to HTTP layer (CONNECT handling)
//!     → connection.rs (tunnel IDs, open-tunnel tracking)
//!
//! Tunnel States:
//!     AwaitingHandshake → Established → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each tunnel tracked for graceful shutdown
//! - A single rustls crypto provider is used for every TLS config

pub mod connection;
pub mod listener;
pub mod tls;
