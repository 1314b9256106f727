//! AES-256-GCM with a 32-byte nonce.
//!
//! This is not the library default (AES-GCM nonces are normally 96 bits);
//! the wider nonce is part of the on-disk format and must be kept exactly
//! as-is for existing encrypted files to keep decrypting.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key};
use rand::RngCore;
use sha2::digest::typenum::U32;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ConfigError, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 32;

type Cipher = AesGcm<Aes256, U32>;

/// A 32-byte symmetric key used to seal/open values.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey(Vec<u8>);

impl DataKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut key = vec![0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        DataKey(key)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        DataKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> Cipher {
        Cipher::new(Key::<Cipher>::from_slice(&self.0))
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = vec![0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher()
            .encrypt(aes_gcm::Nonce::<U32>::from_slice(&nonce), plaintext)
            .map_err(|e| ConfigError::provider_error(format!("encryption failed: {e}")))?;

        let mut out = nonce;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Opens a blob produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE {
            return Err(ConfigError::provider_error("ciphertext too short"));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

        self.cipher()
            .decrypt(aes_gcm::Nonce::<U32>::from_slice(nonce), ciphertext)
            .map_err(|e| ConfigError::provider_error(format!("decryption failed: {e}")))
    }

    pub fn decrypt_to_string(&self, blob: &[u8]) -> Result<String> {
        let plain = self.decrypt(blob)?;
        String::from_utf8(plain).map_err(|e| ConfigError::provider_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = DataKey::generate();
        let blob = key.encrypt(b"hello world").unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + b"hello world".len() + 16);
        assert_eq!(key.decrypt(&blob).unwrap(), b"hello world");
    }

    #[test]
    fn nonce_is_random_per_call() {
        let key = DataKey::generate();
        let a = key.encrypt(b"same plaintext").unwrap();
        let b = key.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert_ne!(&a[..NONCE_SIZE], &b[..NONCE_SIZE]);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let key = DataKey::generate();
        assert!(key.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key = DataKey::generate();
        let other = DataKey::generate();
        let blob = key.encrypt(b"secret").unwrap();
        assert!(other.decrypt(&blob).is_err());
    }
}
