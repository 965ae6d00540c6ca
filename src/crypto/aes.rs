use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use crate::error::{AppError, Result};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// The size of the AES-128 key in bytes.
pub const KEY_SIZE: usize = 16;
/// The size of the CBC initialisation vector in bytes.
pub const IV_SIZE: usize = 16;

/// Decrypts `IV || ciphertext` with AES-128-CBC and strips PKCS#7 padding.
///
/// # Arguments
///
/// * `key` - The AES-128 key.
/// * `data` - The IV followed by the ciphertext.
///
/// # Returns
///
/// The decrypted plaintext. Fails on short input or bad padding.
pub fn decrypt(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_SIZE * 2 || data.len() % IV_SIZE != 0 {
        return Err(AppError::Validation(format!(
            "AES-CBC payload has invalid length {}",
            data.len()
        )));
    }

    let (iv, ciphertext) = data.split_at(IV_SIZE);
    Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| AppError::Validation(format!("AES-CBC init failed: {}", e)))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| AppError::Validation("AES-CBC padding is invalid".to_string()))
}

/// Encrypts `plaintext` with AES-128-CBC under a fresh random IV.
///
/// # Returns
///
/// `IV || ciphertext`, the layout the client sends.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    result
}
