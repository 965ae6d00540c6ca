use base64::{Engine as _, engine::general_purpose};
use sha1::{Digest, Sha1};

use crate::crypto::asymmetric::AsymmetricCipher;
use crate::error::Result;

/// Signs a response body for the `X-Message-Sign` header.
///
/// The digest covers the body followed by the request's X-Message-Code hex
/// string when the client sent one.
pub fn sign_message(
    key: &dyn AsymmetricCipher,
    body: &[u8],
    request_xmc_hex: Option<&str>,
) -> Result<String> {
    let mut sha1 = Sha1::new();
    sha1.update(body);
    if let Some(xmc) = request_xmc_hex {
        sha1.update(xmc.as_bytes());
    }
    let digest: [u8; 20] = sha1.finalize().into();
    let signature = key.sign_sha1(&digest)?;
    Ok(general_purpose::STANDARD.encode(signature))
}
