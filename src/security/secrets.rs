//! Secret header values: AES-GCM decryption and request header rewriting.
//!
//! # Responsibilities
//! - Load the process-wide key from its hex form
//! - Decrypt nonce-prefixed hex ciphertexts stored in header replacements
//! - Overwrite outbound request headers with the decrypted values
//!
//! # Design Decisions
//! - Key size picks the cipher: 16 bytes → AES-128-GCM, 32 bytes → AES-256-GCM
//! - 24-byte (AES-192) keys are rejected at startup: ring has no AES-192-GCM,
//!   so values sealed under such a key must be re-encrypted with a 16- or
//!   32-byte key
//! - Every malformed or unauthenticated ciphertext is a `DecryptionError`
//! - Injected values always replace client-supplied headers of the same name

use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use thiserror::Error;

use crate::store::HeaderReplacement;

/// The configured secret key could not be used.
#[derive(Debug, Error)]
pub enum SecretKeyError {
    #[error("secret key environment variable {0} is not set")]
    Missing(String),

    #[error("secret key is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),

    #[error("secret key must be 16 or 32 bytes (AES-128/AES-256; AES-192 is not supported), got {0}")]
    Length(usize),
}

/// A stored header value could not be decrypted.
#[derive(Debug, Error, PartialEq)]
pub enum DecryptionError {
    #[error("ciphertext is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),

    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    #[error("authentication failed")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    Utf8,

    #[error("decrypted value is not a valid value for header {0}")]
    InvalidHeaderValue(String),

    #[error("invalid header name {0}")]
    InvalidHeaderName(String),
}

/// Plaintext exceeded what the cipher can seal.
#[derive(Debug, Error)]
#[error("encryption failed")]
pub struct EncryptionError;

/// AEAD cipher over the process-wide secret key.
pub struct SecretCipher {
    key: LessSafeKey,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("algorithm", self.key.algorithm())
            .finish()
    }
}

impl SecretCipher {
    /// Build a cipher from raw key bytes.
    pub fn new(key: &[u8]) -> Result<Self, SecretKeyError> {
        let algorithm = match key.len() {
            16 => &aead::AES_128_GCM,
            32 => &aead::AES_256_GCM,
            other => return Err(SecretKeyError::Length(other)),
        };
        let unbound = UnboundKey::new(algorithm, key).map_err(|_| SecretKeyError::Length(key.len()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Build a cipher from a hex-encoded key.
    pub fn from_hex(key_hex: &str) -> Result<Self, SecretKeyError> {
        let key = hex::decode(key_hex.trim())?;
        Self::new(&key)
    }

    /// Read the hex key from the environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self, SecretKeyError> {
        let value = std::env::var(var).map_err(|_| SecretKeyError::Missing(var.to_string()))?;
        Self::from_hex(&value)
    }

    /// Encrypt `plaintext` into hex(nonce || ciphertext || tag).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| EncryptionError)?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a hex(nonce || ciphertext || tag) value.
    pub fn decrypt(&self, hex_data: &str) -> Result<String, DecryptionError> {
        let data = hex::decode(hex_data)?;
        let min_len = NONCE_LEN + self.key.algorithm().tag_len();
        if data.len() < min_len {
            return Err(DecryptionError::TooShort(data.len()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| DecryptionError::TooShort(data.len()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| DecryptionError::Authentication)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| DecryptionError::Utf8)
    }
}

/// Applies a configuration's header replacements to outbound requests.
#[derive(Debug)]
pub struct HeaderRewriter {
    cipher: SecretCipher,
}

impl HeaderRewriter {
    pub fn new(cipher: SecretCipher) -> Self {
        Self { cipher }
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Decrypt every replacement and set it on `headers`, in order.
    ///
    /// All values are decrypted before any header is touched, so a failure
    /// leaves `headers` unchanged.
    pub fn apply(
        &self,
        headers: &mut HeaderMap,
        replacements: &[HeaderReplacement],
    ) -> Result<(), DecryptionError> {
        let mut decrypted = Vec::with_capacity(replacements.len());
        for replacement in replacements {
            let name = HeaderName::from_bytes(replacement.header_name.as_bytes())
                .map_err(|_| DecryptionError::InvalidHeaderName(replacement.header_name.clone()))?;
            let plaintext = self.cipher.decrypt(&replacement.encrypted_value)?;
            let value = HeaderValue::from_str(&plaintext)
                .map_err(|_| DecryptionError::InvalidHeaderValue(replacement.header_name.clone()))?;
            decrypted.push((name, value));
        }

        for (name, value) in decrypted {
            headers.insert(name, value);
        }
        Ok(())
    }
}
