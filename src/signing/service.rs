//! Signing Service
//!
//! Turns canonical message strings into (signature, public key) pairs by
//! hashing them and delegating the digest to the key vault.

use std::sync::Arc;

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::types::{HandshakeError, Result};
use crate::vault::KeyVault;

use super::address::identity_address;
use super::encoding::SignatureEncoding;

/// Output of a signing operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    /// Encoded compact signature
    pub signature: String,

    /// Compressed secp256k1 public key (hex)
    pub pubkey_compressed_hex: String,

    /// Encoding used for `signature`
    pub encoding: SignatureEncoding,
}

/// Stateless signing front-end over a [`KeyVault`].
#[derive(Clone)]
pub struct SigningService {
    vault: Arc<dyn KeyVault>,
}

impl SigningService {
    pub fn new(vault: Arc<dyn KeyVault>) -> Self {
        Self { vault }
    }

    /// Whether the vault currently holds a key.
    pub fn is_available(&self) -> bool {
        self.vault.has_key()
    }

    /// Sign a canonical message.
    ///
    /// SHA-256 over the UTF-8 bytes, then a compact ECDSA signature over
    /// the digest, encoded as requested.
    pub fn sign(&self, message: &str, encoding: SignatureEncoding) -> Result<SignedMessage> {
        let digest = message_digest(message);
        let signature = self.vault.sign_digest(&digest).map_err(|e| {
            warn!(error = %e, "Signing failed");
            e
        })?;
        let public_key = self.vault.compressed_public_key()?;

        debug!(?encoding, message_len = message.len(), "Signed canonical message");

        Ok(SignedMessage {
            signature: encoding.encode(&signature),
            pubkey_compressed_hex: hex::encode(public_key),
            encoding,
        })
    }

    /// Sign on the blocking pool so the caller's poll loop is not held up.
    pub async fn sign_in_background(
        &self,
        message: String,
        encoding: SignatureEncoding,
    ) -> Result<SignedMessage> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.sign(&message, encoding))
            .await
            .map_err(|e| HandshakeError::SigningUnavailable(format!("Signing task failed: {e}")))?
    }

    pub fn public_key_hex(&self) -> Result<String> {
        Ok(hex::encode(self.vault.compressed_public_key()?))
    }

    /// Identity address of the held key.
    pub fn identity_address(&self) -> Result<String> {
        Ok(identity_address(&self.vault.compressed_public_key()?))
    }
}

impl std::fmt::Debug for SigningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningService")
            .field("available", &self.is_available())
            .finish()
    }
}

/// SHA-256 of the message's UTF-8 bytes.
pub fn message_digest(message: &str) -> [u8; 32] {
    Sha256::digest(message.as_bytes()).into()
}

/// Verify an encoded signature over `message` against a hex compressed key.
///
/// Any mismatch is a validation failure.
pub fn verify_signature(
    message: &str,
    signature: &str,
    encoding: SignatureEncoding,
    pubkey_compressed_hex: &str,
) -> Result<()> {
    let compact = encoding.decode(signature)?;
    let signature = Signature::from_slice(&compact)
        .map_err(|e| HandshakeError::Validation(format!("Malformed signature: {e}")))?;

    let key_bytes = hex::decode(pubkey_compressed_hex)
        .map_err(|e| HandshakeError::Validation(format!("Invalid public key hex: {e}")))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|e| HandshakeError::Validation(format!("Invalid public key: {e}")))?;

    verifying_key
        .verify_prehash(&message_digest(message), &signature)
        .map_err(|_| HandshakeError::Validation("Signature does not match message".into()))
}
