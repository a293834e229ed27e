// Note: Deprecation warnings from generic-array 0.14.x are expected
// until aes-gcm moves to generic-array 1.x
#![allow(deprecated)]

use aes_gcm::{
    aead::{Aead, KeyInit},
    AeadCore, Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use thiserror::Error;

const NONCE_LENGTH: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    #[error("Base64 decode error: {0}")]
    Decode(String),

    #[error("Invalid encrypted data")]
    InvalidData,

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("UTF-8 decode failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encrypts webhook secrets at rest with AES-256-GCM.
///
/// Ciphertext format: `base64(nonce || ciphertext || tag)`.
#[derive(Debug, Clone)]
pub struct EncryptionService {
    master_key: Arc<[u8; 32]>,
}

impl EncryptionService {
    /// Accepts either a raw 32-byte key or a hex-encoded 64-character key
    pub fn new(master_key: &str) -> Result<Self, EncryptionError> {
        let key_bytes = match master_key.len() {
            32 => master_key.as_bytes().to_vec(),
            64 => hex::decode(master_key)
                .map_err(|e| EncryptionError::InvalidKey(format!("invalid hex: {}", e)))?,
            _ => {
                return Err(EncryptionError::InvalidKey(
                    "Master key must be exactly 32 bytes or 64 hex characters".to_string(),
                ))
            }
        };

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);

        Ok(Self {
            master_key: Arc::new(key),
        })
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<String, EncryptionError> {
        let cipher = Aes256Gcm::new(self.master_key.as_slice().into());
        let nonce = Aes256Gcm::generate_nonce(&mut aes_gcm::aead::OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, data)
            .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

        let mut combined = nonce.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded_data: &str) -> Result<Vec<u8>, EncryptionError> {
        let data = BASE64
            .decode(encoded_data)
            .map_err(|e| EncryptionError::Decode(e.to_string()))?;

        if data.len() < NONCE_LENGTH {
            return Err(EncryptionError::InvalidData);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new(self.master_key.as_slice().into());

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::Cipher(e.to_string()))
    }

    pub fn encrypt_string(&self, data: &str) -> Result<String, EncryptionError> {
        self.encrypt(data.as_bytes())
    }

    pub fn decrypt_string(&self, encoded_data: &str) -> Result<String, EncryptionError> {
        let decrypted = self.decrypt(encoded_data)?;
        Ok(String::from_utf8(decrypted)?)
    }

    /// Generates a random 32-byte key as hex string (for direct use with new())
    pub fn generate_raw_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "12345678901234567890123456789012";

    #[test]
    fn test_new_with_invalid_key_length() {
        let result = EncryptionService::new("short");
        assert!(matches!(result, Err(EncryptionError::InvalidKey(_))));
    }

    #[test]
    fn test_new_with_hex_key() {
        let key = EncryptionService::generate_raw_key();
        assert_eq!(key.len(), 64);
        assert!(EncryptionService::new(&key).is_ok());
    }

    #[test]
    fn test_secret_round_trip() {
        let service = EncryptionService::new(KEY).unwrap();

        let encrypted = service.encrypt_string("whsec_abc123").unwrap();
        assert_ne!(encrypted, "whsec_abc123");
        assert_eq!(service.decrypt_string(&encrypted).unwrap(), "whsec_abc123");
    }

    #[test]
    fn test_encryption_different_each_time() {
        let service = EncryptionService::new(KEY).unwrap();

        let encrypted1 = service.encrypt_string("same").unwrap();
        let encrypted2 = service.encrypt_string("same").unwrap();

        // Random nonce per call
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_decrypt_too_short_data() {
        let service = EncryptionService::new(KEY).unwrap();
        let short_data = BASE64.encode(b"short");

        assert!(matches!(
            service.decrypt_string(&short_data),
            Err(EncryptionError::InvalidData)
        ));
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let service1 = EncryptionService::new(KEY).unwrap();
        let service2 = EncryptionService::new("09876543210987654321098765432109").unwrap();

        let encrypted = service1.encrypt_string("secret").unwrap();
        assert!(matches!(
            service2.decrypt_string(&encrypted),
            Err(EncryptionError::Cipher(_))
        ));
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        let service = EncryptionService::new(KEY).unwrap();
        assert!(matches!(
            service.decrypt_string("not base64!!"),
            Err(EncryptionError::Decode(_))
        ));
    }
}
