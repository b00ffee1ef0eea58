//! Proxy-Authorization credential parsing.
//!
//! The header carries `<scheme> base64(tenant:secret:config)`. Parsing is
//! total: any input yields either a credential with three fields or a
//! `CredentialError`.

use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

/// Identity presented by a tunnel.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential {
    pub tenant_id: String,
    pub access_secret: String,
    pub config_id: String,
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredential")
            .field("tenant_id", &self.tenant_id)
            .field("access_secret", &"<redacted>")
            .field("config_id", &self.config_id)
            .finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("proxy authorization header is empty")]
    Empty,

    #[error("proxy authorization header must be '<scheme> <token>'")]
    Format,

    #[error("proxy authorization token is not valid base64")]
    Encoding,

    #[error("proxy authorization token must hold tenant:secret:config")]
    Fields,
}

/// Parse a Proxy-Authorization header value.
pub fn parse_credential(header: &str) -> Result<AuthCredential, CredentialError> {
    if header.is_empty() {
        return Err(CredentialError::Empty);
    }

    let parts: Vec<&str> = header.split(' ').collect();
    let [_scheme, token] = parts.as_slice() else {
        return Err(CredentialError::Format);
    };

    let decoded = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| CredentialError::Encoding)?;
    let decoded = String::from_utf8(decoded).map_err(|_| CredentialError::Encoding)?;

    let fields: Vec<&str> = decoded.split(':').collect();
    let [tenant_id, access_secret, config_id] = fields.as_slice() else {
        return Err(CredentialError::Fields);
    };

    Ok(AuthCredential {
        tenant_id: tenant_id.to_string(),
        access_secret: access_secret.to_string(),
        config_id: config_id.to_string(),
    })
}
