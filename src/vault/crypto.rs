//! Cryptographic primitives for the local key vault.
//!
//! # Algorithms
//!
//! - **Identity keys**: secp256k1 ECDSA
//! - **Key Derivation**: Argon2id (memory-hard, brute-force resistant)
//! - **Encryption at rest**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! # Security Parameters
//!
//! Argon2id parameters are tuned for passphrase-based key encryption:
//! - 64 MB memory
//! - 3 iterations
//! - 4 parallelism threads

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::types::{HandshakeError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Argon2id memory cost in KiB (64 MB)
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism (threads)
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// secp256k1 secret scalar length (32 bytes)
pub const PRIVATE_KEY_LEN: usize = 32;

/// Compressed SEC1 public key length (33 bytes)
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// Compact r||s signature length (64 bytes)
pub const SIGNATURE_LEN: usize = 64;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

// =============================================================================
// Key Generation
// =============================================================================

/// Generate a new secp256k1 signing key from the OS random source.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Compressed SEC1 encoding of a signing key's public half.
pub fn compressed_public_key(signing_key: &SigningKey) -> Result<[u8; COMPRESSED_PUBKEY_LEN]> {
    let point = signing_key.verifying_key().to_encoded_point(true);
    point.as_bytes().try_into().map_err(|_| {
        HandshakeError::Crypto(format!(
            "Unexpected public key length: {}",
            point.as_bytes().len()
        ))
    })
}

// =============================================================================
// Key Derivation
// =============================================================================

/// Derive a 256-bit encryption key from a passphrase using Argon2id.
pub fn derive_key_encryption_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| HandshakeError::Crypto(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, key.as_mut_slice())
        .map_err(|e| HandshakeError::Crypto(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

// =============================================================================
// Encryption / Decryption
// =============================================================================

/// Encrypt a private key using ChaCha20-Poly1305.
///
/// Returns 48 bytes: the encrypted scalar followed by the auth tag.
/// The nonce must never be reused with the same key.
pub fn encrypt_private_key(
    private_key: &[u8; PRIVATE_KEY_LEN],
    encryption_key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    cipher
        .encrypt(Nonce::from_slice(nonce), private_key.as_slice())
        .map_err(|e| HandshakeError::Crypto(format!("Encryption failed: {e}")))
}

/// Decrypt a private key using ChaCha20-Poly1305.
///
/// Fails when the ciphertext was tampered with or the passphrase is wrong.
pub fn decrypt_private_key(
    ciphertext: &[u8],
    encryption_key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Zeroizing<[u8; PRIVATE_KEY_LEN]>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                HandshakeError::SigningUnavailable("Failed to decrypt key (wrong passphrase?)".into())
            })?,
    );

    if plaintext.len() != PRIVATE_KEY_LEN {
        return Err(HandshakeError::Crypto(format!(
            "Invalid decrypted key length: expected {}, got {}",
            PRIVATE_KEY_LEN,
            plaintext.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

// =============================================================================
// Tests
// =============================================================================
