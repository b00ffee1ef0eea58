//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Inner request on an authenticated tunnel:
//!     → rate_limit.rs (GCRA admission per tenant:config key)
//!     → redis_limiter.rs (shared admission state, when configured)
//!     → secrets.rs (decrypt and inject configured headers)
//!     → Pass to forwarding
//! ```
//!
//! # Design Decisions
//! - Fail closed: a store or decryption failure never forwards the request
//! - Secrets are decrypted per request and never logged

pub mod rate_limit;
pub mod redis_limiter;
pub mod secrets;
