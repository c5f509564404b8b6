//! Symmetric encryption for stored provider API keys
//!
//! Keys are encrypted at rest with AES-256-GCM under a process-wide master
//! key. The stored form is base64(nonce || ciphertext); plaintext exists
//! only in memory during dispatch.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::utils::error::{GatewayError, Result};

const NONCE_LEN: usize = 12;

/// Cipher handle bound to the gateway master key
#[derive(Clone)]
pub struct KeyCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCipher").finish_non_exhaustive()
    }
}

impl KeyCipher {
    /// Derive the AEAD key from the master key string.
    ///
    /// The master key is an operator-chosen secret of arbitrary length, so
    /// it is run through SHA-256 to produce the fixed 32-byte cipher key.
    pub fn new(master_key: &str) -> Self {
        let digest = Sha256::digest(master_key.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a plaintext API key for storage
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| GatewayError::crypto(format!("encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt a stored API key
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| GatewayError::crypto(format!("invalid key encoding: {}", e)))?;

        if combined.len() <= NONCE_LEN {
            return Err(GatewayError::crypto("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| GatewayError::crypto(format!("decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| GatewayError::crypto(format!("decrypted key is not UTF-8: {}", e)))
    }
}

/// Hash an inbound bearer token for API key lookup.
///
/// Provisioned keys are stored as sha-256 hex digests; plaintext is never
/// persisted.
pub fn hash_api_key(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
