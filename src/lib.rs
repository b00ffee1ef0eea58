//! Intercepting CONNECT proxy that injects secret headers and rate limits
//! per tenant configuration.

pub mod auth;
pub mod authority;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod store;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
