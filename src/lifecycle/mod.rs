//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Root CA → secret key → stores → limiter → forwarder → ProxyServer
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain tunnels → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: anything that can fail runs before the listener binds
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: tunnels still open after the deadline are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::StartupError;
