//! Root certificate authority.
//!
//! # Responsibilities
//! - Load the persisted root certificate and key at startup
//! - Generate a fresh self-signed root for first-time setup
//! - Persist generated material so clients can install the root

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Lifetime given to generated roots.
const ROOT_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in CA PEM")]
    MissingCertificate,

    #[error("invalid CA PEM: {0}")]
    Pem(std::io::Error),

    #[error("invalid CA private key: {0}")]
    Key(#[source] rcgen::Error),

    #[error("invalid CA certificate: {0}")]
    Certificate(#[source] rcgen::Error),
}

/// The process-wide signing root.
///
/// Loaded once and shared read-only by every tunnel.
pub struct RootAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    key_pem: String,
}

impl std::fmt::Debug for RootAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootAuthority")
            .field("cert_der_len", &self.cert_der.len())
            .finish_non_exhaustive()
    }
}

impl RootAuthority {
    /// Load the root certificate and key from PEM files.
    pub fn load_from_files(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem = fs::read_to_string(cert_path).map_err(|source| CaError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
        let key_pem = fs::read_to_string(key_path).map_err(|source| CaError::Read {
            path: key_path.to_path_buf(),
            source,
        })?;

        let authority = Self::from_pem(&cert_pem, &key_pem)?;
        tracing::info!(cert_path = %cert_path.display(), "Loaded root certificate authority");
        Ok(authority)
    }

    /// Build an authority from PEM strings.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or(CaError::MissingCertificate)?
            .map_err(CaError::Pem)?;

        let key = KeyPair::from_pem(key_pem).map_err(CaError::Key)?;
        let issuer = Issuer::from_ca_cert_der(&cert_der, key).map_err(CaError::Certificate)?;

        Ok(Self {
            issuer,
            cert_der,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    /// Generate a new self-signed root.
    pub fn generate(common_name: &str) -> Result<Self, CaError> {
        let key = KeyPair::generate().map_err(CaError::Key)?;
        let key_pem = key.serialize_pem();

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, common_name.to_string());
        params.distinguished_name = name;

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);

        let cert = params.self_signed(&key).map_err(CaError::Certificate)?;
        let cert_pem = cert.pem();
        let cert_der = cert.der().clone();

        Ok(Self {
            issuer: Issuer::new(params, key),
            cert_der,
            cert_pem,
            key_pem,
        })
    }

    /// Write the certificate and key as PEM, creating parent directories.
    pub fn persist(&self, cert_path: &Path, key_path: &Path) -> Result<(), CaError> {
        write_file(cert_path, &self.cert_pem)?;
        write_file(key_path, &self.key_pem)?;
        tracing::info!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "Wrote root certificate authority"
        );
        Ok(())
    }

    pub fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), CaError> {
    let write_error = |source| CaError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
    }
    fs::write(path, contents).map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("api-key-limiter-{}-{}", name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn generated_root_round_trips_through_files() {
        let dir = temp_dir("ca");
        let cert_path = dir.join("nested").join("ca.pem");
        let key_path = dir.join("nested").join("ca.key.pem");

        let generated = RootAuthority::generate("Test Root").unwrap();
        generated.persist(&cert_path, &key_path).unwrap();

        let loaded = RootAuthority::load_from_files(&cert_path, &key_path).unwrap();
        assert_eq!(loaded.cert_der(), generated.cert_der());
        assert!(loaded.cert_pem().starts_with("-----BEGIN CERTIFICATE-----"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_files_fail() {
        let err = RootAuthority::load_from_files(
            Path::new("/nonexistent/ca.pem"),
            Path::new("/nonexistent/ca.key.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, CaError::Read { .. }));
    }

    #[test]
    fn malformed_material_fails() {
        let root = RootAuthority::generate("Test Root").unwrap();
        assert!(matches!(
            RootAuthority::from_pem("not a pem", &root.key_pem),
            Err(CaError::MissingCertificate)
        ));
        assert!(matches!(
            RootAuthority::from_pem(root.cert_pem(), "garbage"),
            Err(CaError::Key(_))
        ));
    }
}
