//! Password envelope applied to the whole payload before chunking.
//!
//! Layout: `salt (16) || nonce (16) || tag (16) || ciphertext`. Key: PBKDF2-HMAC-SHA1,
//! 100 000 iterations, 32 bytes, the PyCryptodome `PBKDF2` default PRF. Cipher: AES-256-GCM with
//! a 16-byte nonce. Salt and nonce are fresh OS randomness on every call.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;

pub const SALT_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;
pub const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE + TAG_SIZE;
pub const KDF_ITERATIONS: u32 = 100_000;
pub const KEY_SIZE: usize = 32;

type EnvelopeCipher = AesGcm<Aes256, U16>;

/// Derive the 32-byte envelope key from a password and salt.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    key
}

fn cipher(key: &[u8; KEY_SIZE]) -> Result<EnvelopeCipher, CryptoError> {
    EnvelopeCipher::new_from_slice(key).map_err(|_| CryptoError::Cipher)
}

/// Encrypt `plaintext` under `password`.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt);
    let mut buf = plaintext.to_vec();
    let tag = cipher(&key)?
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buf)
        .map_err(|_| CryptoError::Cipher)?;

    let mut out = Vec::with_capacity(HEADER_SIZE + buf.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&buf);
    Ok(out)
}

/// Decrypt an envelope. A wrong password and a corrupted envelope both fail authentication.
pub fn decrypt(envelope: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < HEADER_SIZE {
        return Err(CryptoError::Truncated {
            len: envelope.len(),
        });
    }
    let (salt, rest) = envelope.split_at(SALT_SIZE);
    let (nonce, rest) = rest.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);

    let key = derive_key(password, salt);
    let mut buf = ciphertext.to_vec();
    cipher(&key)?
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            &mut buf,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::Authentication)?;
    Ok(buf)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("envelope truncated: {len} bytes")]
    Truncated { len: usize },
    #[error("authentication failed: wrong password or corrupted data")]
    Authentication,
    #[error("payload is encrypted but no password was supplied")]
    MissingPassword,
    #[error("cipher failure")]
    Cipher,
}
