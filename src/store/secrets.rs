//! Encryption of storage credentials at rest. Secret keys are stored as an
//! opaque string and only decrypted when an S3 client is constructed.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::models::FsError;

const VERSION_PREFIX: &str = "v1:";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

// Argon2id costs, OWASP-recommended defaults.
const KDF_MEMORY_COST: u32 = 19_456; // KiB
const KDF_TIME_COST: u32 = 2;
const KDF_PARALLELISM: u32 = 1;

/// AES-256-GCM cipher over a key derived from a process-wide passphrase.
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Derive the process key from a passphrase and a deployment-stable salt.
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, FsError> {
        let params = argon2::Params::new(KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM, Some(32))
            .map_err(|e| FsError::internal(format!("Argon2 params error: {}", e)))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| FsError::internal(format!("key derivation failed: {}", e)))?;
        Ok(Self { key })
    }

    /// Use a raw 32-byte key directly (e.g. from a key management service).
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt a secret into the `v1:<base64 nonce || ciphertext>` wire form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, FsError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| FsError::internal(format!("cipher init failed: {}", e)))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(AesNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| FsError::internal("secret encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", VERSION_PREFIX, BASE64.encode(blob)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, FsError> {
        let encoded = stored
            .strip_prefix(VERSION_PREFIX)
            .ok_or_else(|| FsError::internal("unrecognized secret format"))?;
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| FsError::internal(format!("secret decode failed: {}", e)))?;
        if blob.len() <= NONCE_LEN {
            return Err(FsError::internal("secret blob is truncated"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| FsError::internal(format!("cipher init failed: {}", e)))?;
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(AesNonce::from_slice(nonce), ciphertext)
            .map_err(|_| FsError::internal("secret decryption failed (wrong key?)"))?;

        String::from_utf8(plaintext)
            .map_err(|e| FsError::internal(format!("decrypted secret is not UTF-8: {}", e)))
    }
}

/// Generate a random salt for a fresh deployment.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
