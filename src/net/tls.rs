//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Pin the process to a single rustls crypto provider
//! - Load PEM certificates and keys for the optional TLS listener
//! - Build the root store and client config used toward origins
//!
//! # Design Decisions
//! - Both sides of an intercepted tunnel advertise only `http/1.1` via ALPN
//! - Native roots load best-effort; unreadable entries are skipped with a log line

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// ALPN identifier offered on every TLS session the proxy takes part in.
pub const ALPN_HTTP1: &[u8] = b"http/1.1";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("no trusted root certificates available for upstream connections")]
    NoRoots,

    #[error("invalid server name: {0}")]
    ServerName(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// The crypto provider every rustls config in the process is built with.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Server config presenting `chain`, HTTP/1.1 only.
pub fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, TlsError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];
    Ok(config)
}

/// Acceptor for running the proxy listener itself over TLS.
pub fn listener_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = server_config(chain, key)?;

    tracing::info!(cert_path = %cert_path.display(), "Loaded listener TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Trusted roots for origin connections.
pub fn upstream_roots(use_native: bool, extra_paths: &[PathBuf]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    if use_native {
        let native = rustls_native_certs::load_native_certs();
        for err in native.errors {
            tracing::debug!(error = %err, "Skipping unreadable native certificate");
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "Loaded native root certificates");
    }

    for path in extra_paths {
        for cert in load_certs(path)? {
            roots.add(cert)?;
        }
        tracing::info!(path = %path.display(), "Added extra upstream roots");
    }

    if roots.is_empty() {
        return Err(TlsError::NoRoots);
    }
    Ok(roots)
}

/// Client config for origin connections, HTTP/1.1 only.
pub fn upstream_client_config(roots: RootCertStore) -> Result<Arc<ClientConfig>, TlsError> {
    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];
    Ok(Arc::new(config))
}

/// Convert a host (DNS name or IP literal) into a TLS server name.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|_| TlsError::ServerName(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_names_accept_dns_and_ip() {
        assert!(matches!(server_name("example.com"), Ok(ServerName::DnsName(_))));
        assert!(matches!(server_name("127.0.0.1"), Ok(ServerName::IpAddress(_))));
        assert!(matches!(server_name("::1"), Ok(ServerName::IpAddress(_))));
        assert!(server_name("bad name").is_err());
    }

    #[test]
    fn missing_files_are_reported_with_path() {
        let err = load_certs(Path::new("/nonexistent/ca.pem")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn empty_root_store_is_an_error() {
        assert!(matches!(upstream_roots(false, &[]), Err(TlsError::NoRoots)));
    }
}
