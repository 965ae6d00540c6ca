//! Session token envelopes.
//!
//! Wire format, base64url with padding:
//!
//! ```text
//! salt (16 bytes) || tag (32 bytes) || token (ASCII hex)
//! tag = HMAC-SHA256(secret, FORMAT_VERSION || salt || token)
//! ```

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The size of the per-envelope salt in bytes.
pub const SALT_SIZE: usize = 16;
/// The size of the integrity tag in bytes.
pub const TAG_SIZE: usize = 32;
/// Random bytes behind each token; the token string is their hex form.
pub const TOKEN_BYTES: usize = 16;
/// Bound into every tag so a future layout cannot be confused with this one.
pub const FORMAT_VERSION: u8 = 1;

/// Generates a new random opaque token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Encodes and verifies token envelopes with a process-wide secret.
pub struct TokenCodec {
    secret: Zeroizing<Vec<u8>>,
}

impl TokenCodec {
    /// Creates a codec keyed by `secret`.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }

    fn mac(&self, salt: &[u8], token: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(&[FORMAT_VERSION]);
        mac.update(salt);
        mac.update(token);
        Ok(mac)
    }

    /// Wraps `token` in a freshly salted envelope.
    pub fn encapsulate(&self, token: &str) -> Result<String> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let tag = self.mac(&salt, token.as_bytes())?.finalize().into_bytes();

        let mut envelope = Vec::with_capacity(SALT_SIZE + TAG_SIZE + token.len());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&tag);
        envelope.extend_from_slice(token.as_bytes());
        Ok(general_purpose::URL_SAFE.encode(envelope))
    }

    /// Verifies an envelope and returns the token inside it.
    ///
    /// Every malformed or forged input yields [`AppError::BadToken`].
    pub fn decapsulate(&self, envelope: &str) -> Result<String> {
        let raw = general_purpose::URL_SAFE
            .decode(envelope.trim())
            .map_err(|_| AppError::BadToken)?;

        if raw.len() <= SALT_SIZE + TAG_SIZE || raw.len() > SALT_SIZE + TAG_SIZE + TOKEN_BYTES * 4 {
            return Err(AppError::BadToken);
        }

        let (salt, signed) = raw.split_at(SALT_SIZE);
        let (tag, token) = signed.split_at(TAG_SIZE);

        self.mac(salt, token)?
            .verify_slice(tag)
            .map_err(|_| AppError::BadToken)?;

        if !token.iter().all(u8::is_ascii_hexdigit) {
            return Err(AppError::BadToken);
        }

        String::from_utf8(token.to_vec()).map_err(|_| AppError::BadToken)
    }
}
