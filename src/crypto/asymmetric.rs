use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};

/// The server's asymmetric key, as seen by the handshake and the signer.
pub trait AsymmetricCipher: Send + Sync {
    /// Decrypts a PKCS#1 v1.5 encrypted message.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Signs a SHA-1 digest with PKCS#1 v1.5 padding.
    fn sign_sha1(&self, digest: &[u8; 20]) -> Result<Vec<u8>>;
}

/// RSA implementation of [`AsymmetricCipher`].
pub struct ServerKey {
    private: RsaPrivateKey,
}

impl ServerKey {
    /// Wraps an already-loaded private key.
    pub fn new(private: RsaPrivateKey) -> Self {
        Self { private }
    }

    /// Parses a PEM private key in either PKCS#1 or PKCS#8 form.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| AppError::Encryption(format!("Invalid server private key: {}", e)))?;
        Ok(Self::new(private))
    }

    /// Loads the private key from a PEM file.
    pub fn load(path: &Path) -> Result<Self> {
        let pem = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            AppError::Internal(format!(
                "Unable to read server private key {}: {}",
                path.display(),
                e
            ))
        })?);
        Self::from_pem(&pem)
    }

    /// The public half, as distributed to clients.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }
}

impl AsymmetricCipher for ServerKey {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| AppError::BadHandshake(format!("RSA decryption failed: {}", e)))
    }

    fn sign_sha1(&self, digest: &[u8; 20]) -> Result<Vec<u8>> {
        self.private
            .sign(Pkcs1v15Sign::new::<Sha1>(), digest)
            .map_err(|e| AppError::Encryption(format!("RSA signing failed: {}", e)))
    }
}
