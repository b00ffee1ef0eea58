//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, per-tunnel spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Tunnel ID flows through every event of a tunnel via its span
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed
//! - Credentials and decrypted header values never reach either sink

pub mod logging;
pub mod metrics;
