//! Passphrase-sealed key file.
//!
//! The bundle carries everything needed to restore the identity key on the
//! same or another device, given the passphrase.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{HandshakeError, Result};

use super::crypto::{
    decrypt_private_key, derive_key_encryption_key, encrypt_private_key, generate_random_bytes,
    NONCE_LEN, SALT_LEN,
};
use super::{KeyVault, LocalKeyVault};

/// Current key file format version
pub const KEY_FILE_VERSION: u32 = 1;

/// Encrypted identity key as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyFile {
    /// Format version (for forward compatibility)
    pub version: u32,

    /// Compressed secp256k1 public key (hex)
    pub public_key: String,

    /// Encrypted secret scalar (base64), still passphrase-protected
    pub encrypted_private_key: String,

    /// Key derivation salt (base64)
    pub key_derivation_salt: String,

    /// Encryption nonce (base64)
    pub encryption_nonce: String,

    /// When this file was sealed (RFC 3339)
    pub created_at: String,
}

impl EncryptedKeyFile {
    /// Seal the key held by `vault` under `passphrase`.
    pub fn seal(vault: &LocalKeyVault, passphrase: &str) -> Result<Self> {
        let secret = vault.secret_bytes()?;
        let public_key = vault.compressed_public_key()?;

        let salt: [u8; SALT_LEN] = generate_random_bytes();
        let nonce: [u8; NONCE_LEN] = generate_random_bytes();
        let kek = derive_key_encryption_key(passphrase.as_bytes(), &salt)?;
        let encrypted = encrypt_private_key(&secret, &kek, &nonce)?;

        let file = Self {
            version: KEY_FILE_VERSION,
            public_key: hex::encode(public_key),
            encrypted_private_key: BASE64.encode(&encrypted),
            key_derivation_salt: BASE64.encode(salt),
            encryption_nonce: BASE64.encode(nonce),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        debug!(public_key = %file.public_key, "Sealed identity key");
        Ok(file)
    }

    /// Decrypt the key into a fresh vault.
    pub fn unseal(&self, passphrase: &str) -> Result<LocalKeyVault> {
        if self.version != KEY_FILE_VERSION {
            return Err(HandshakeError::Config(format!(
                "Unsupported key file version {}",
                self.version
            )));
        }

        let salt = decode_field("salt", &self.key_derivation_salt)?;
        let nonce = decode_field("nonce", &self.encryption_nonce)?;
        let encrypted = decode_field("ciphertext", &self.encrypted_private_key)?;

        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| HandshakeError::Crypto("Invalid nonce length".into()))?;

        let kek = derive_key_encryption_key(passphrase.as_bytes(), &salt)?;
        let secret = decrypt_private_key(&encrypted, &kek, &nonce)?;
        let vault = LocalKeyVault::from_secret_bytes(&secret)?;

        // Guard against a file whose public half was edited
        if hex::encode(vault.compressed_public_key()?) != self.public_key {
            return Err(HandshakeError::Crypto(
                "Key file public key does not match decrypted key".into(),
            ));
        }

        Ok(vault)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        info!(path = %path.display(), "Wrote key file");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| HandshakeError::Crypto(format!("Invalid {name} encoding: {e}")))
}
