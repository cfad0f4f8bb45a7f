//! Local key vault
//!
//! Holds the application's secp256k1 identity key and signs 32-byte
//! digests with it. Callers only ever see signatures and the compressed
//! public key; the secret scalar never leaves this module.
//!
//! # At rest
//!
//! The key can be persisted as an [`EncryptedKeyFile`]: the scalar is
//! encrypted with ChaCha20-Poly1305 under an Argon2id-derived key, so the
//! file alone is useless without the passphrase.

pub mod crypto;
pub mod keyfile;
pub mod local;

pub use crypto::{COMPRESSED_PUBKEY_LEN, SIGNATURE_LEN};
pub use keyfile::EncryptedKeyFile;
pub use local::LocalKeyVault;

use crate::types::Result;

/// Secure per-application signing key storage.
pub trait KeyVault: Send + Sync {
    /// Sign a SHA-256 digest, returning a 64-byte compact (r||s) signature.
    ///
    /// Fails with `SigningUnavailable` when no key is loaded.
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN]>;

    /// The 33-byte compressed SEC1 public key.
    fn compressed_public_key(&self) -> Result<[u8; COMPRESSED_PUBKEY_LEN]>;

    /// Whether a key is currently loaded and usable.
    fn has_key(&self) -> bool {
        self.compressed_public_key().is_ok()
    }
}

impl<V: KeyVault + ?Sized> KeyVault for std::sync::Arc<V> {
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN]> {
        (**self).sign_digest(digest)
    }

    fn compressed_public_key(&self) -> Result<[u8; COMPRESSED_PUBKEY_LEN]> {
        (**self).compressed_public_key()
    }

    fn has_key(&self) -> bool {
        (**self).has_key()
    }
}
