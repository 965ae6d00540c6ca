//! X-Message-Code: the HMAC-SHA1 tag clients attach to `request_data`.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::models::session::TokenData;

type HmacSha1 = Hmac<Sha1>;

/// How an endpoint derives the key its X-Message-Code is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmcMode {
    /// No verification.
    None,
    /// Key from the session's key exchange.
    Shared,
    /// Key from the fixed process-wide secrets.
    Cross,
}

/// `client_key XOR server_key`.
pub fn shared_key(token: &TokenData) -> [u8; 32] {
    xor32(&token.client_key, &token.server_key)
}

/// `(pad[16..32] ^ app[0..16]) || (pad[0..16] ^ app[16..32])`.
///
/// The halves are crossed on purpose; the client derives the key this way.
pub fn cross_key(base_xorpad: &[u8; 32], application_key: &[u8; 32]) -> [u8; 32] {
    let mut key = [0u8; 32];
    for i in 0..16 {
        key[i] = base_xorpad[16 + i] ^ application_key[i];
        key[16 + i] = base_xorpad[i] ^ application_key[16 + i];
    }
    key
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    std::array::from_fn(|i| a[i] ^ b[i])
}

/// `HMAC-SHA1(key, message)`.
pub fn hmac_sha1(key: &[u8], message: &[u8]) -> Result<[u8; 20]> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC init failed: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Uppercase hex X-Message-Code of `body` under `key`.
pub fn message_code(key: &[u8], body: &[u8]) -> Result<String> {
    Ok(hex::encode_upper(hmac_sha1(key, body)?))
}

/// Checks a client-supplied X-Message-Code in constant time.
///
/// The header is compared case-insensitively, the way the client emits it.
pub fn verify(key: &[u8], body: &[u8], supplied: &str) -> Result<()> {
    let expected = message_code(key, body)?;
    let supplied = supplied.trim().to_ascii_uppercase();
    if bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::IntegrityMismatch("X-Message-Code does not match"))
    }
}
