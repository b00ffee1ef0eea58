//! Tunnel and forwarding errors.

use hyper::StatusCode;
use thiserror::Error;

use crate::authority::CertificateError;
use crate::net::tls::TlsError;

/// A tunnel ended abnormally. Only the affected tunnel is torn down.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("connection upgrade failed: {0}")]
    Upgrade(#[source] hyper::Error),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("client TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("client TLS handshake timed out")]
    HandshakeTimeout,

    #[error("tunneled connection failed: {0}")]
    Connection(#[source] hyper::Error),

    #[error("listener TLS handshake failed: {0}")]
    ListenerTls(#[source] std::io::Error),
}

/// Forwarding a request to its origin failed. Never retried.
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("invalid destination: {0}")]
    Destination(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("origin TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("origin TLS handshake timed out")]
    HandshakeTimeout,

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("origin request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("origin request timed out")]
    Timeout,
}

impl ForwardingError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ForwardingError::ConnectTimeout(_)
                | ForwardingError::HandshakeTimeout
                | ForwardingError::Timeout
        )
    }

    /// Status written back down the tunnel.
    pub fn status(&self) -> StatusCode {
        if self.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}
