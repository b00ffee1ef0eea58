//! Per-tunnel leaf certificate issuance.
//!
//! # Responsibilities
//! - Mint a leaf for exactly the requested hostnames, signed by the root
//! - Stamp a fixed validity window starting at issuance
//! - Turn the leaf into a rustls server config for the client handshake
//!
//! # Design Decisions
//! - A fresh key pair per call; nothing is cached between tunnels
//! - Validity is whole seconds, matching X.509 time precision, so
//!   `not_after - not_before` equals the requested window exactly

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use time::OffsetDateTime;

use super::RootAuthority;
use crate::net::tls::{self, TlsError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("at least one hostname is required")]
    NoHostnames,

    #[error("invalid hostname {0:?}")]
    InvalidHostname(String),

    #[error("invalid validity window: {0}")]
    Validity(String),

    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// A leaf certificate minted for one tunnel.
pub struct LeafCertificate {
    pub hostnames: Vec<String>,
    pub cert_pem: String,
    pub key_pem: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
    root_der: CertificateDer<'static>,
}

impl std::fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("hostnames", &self.hostnames)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl LeafCertificate {
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Server config presenting `[leaf, root]`, HTTP/1.1 only.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        let chain = vec![self.cert_der.clone(), self.root_der.clone()];
        let key = PrivateKeyDer::Pkcs8(self.key_der.clone_key());
        Ok(Arc::new(tls::server_config(chain, key)?))
    }
}

/// Issue a leaf covering exactly `hostnames`, valid for `validity` from now.
pub fn issue<S: AsRef<str>>(
    hostnames: &[S],
    ca: &RootAuthority,
    validity: Duration,
) -> Result<LeafCertificate, CertificateError> {
    let mut names: Vec<String> = Vec::with_capacity(hostnames.len());
    for host in hostnames {
        let host = host.as_ref();
        if host.is_empty() {
            return Err(CertificateError::InvalidHostname(host.to_string()));
        }
        if !names.iter().any(|existing| existing == host) {
            names.push(host.to_string());
        }
    }
    let common_name = names.first().ok_or(CertificateError::NoHostnames)?.clone();

    let mut params = CertificateParams::default();
    params.is_ca = IsCa::NoCa;
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name = distinguished_name;

    for host in &names {
        let san = match host.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                host.as_str()
                    .try_into()
                    .map_err(|_| CertificateError::InvalidHostname(host.clone()))?,
            ),
        };
        params.subject_alt_names.push(san);
    }

    let (not_before, not_after) = validity_window(OffsetDateTime::now_utc(), validity)?;
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, ca.issuer())?;

    metrics::record_leaf_issued();
    tracing::debug!(hostnames = ?names, not_after = %not_after, "Issued leaf certificate");

    Ok(LeafCertificate {
        hostnames: names,
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        not_before,
        not_after,
        cert_der: cert.der().clone(),
        key_der: PrivatePkcs8KeyDer::from(key.serialize_der()),
        root_der: ca.cert_der().clone(),
    })
}

fn validity_window(
    now: OffsetDateTime,
    validity: Duration,
) -> Result<(OffsetDateTime, OffsetDateTime), CertificateError> {
    if validity.as_secs() == 0 {
        return Err(CertificateError::Validity("must be at least one second".into()));
    }
    let not_before = now
        .replace_nanosecond(0)
        .map_err(|e| CertificateError::Validity(e.to_string()))?;
    let window = time::Duration::seconds(
        i64::try_from(validity.as_secs()).map_err(|e| CertificateError::Validity(e.to_string()))?,
    );
    let not_after = not_before
        .checked_add(window)
        .ok_or_else(|| CertificateError::Validity("window overflows calendar".into()))?;
    Ok((not_before, not_after))
}
