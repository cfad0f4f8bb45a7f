//! In-process key vault.

use std::sync::RwLock;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::types::{HandshakeError, Result};

use super::crypto::{self, COMPRESSED_PUBKEY_LEN, PRIVATE_KEY_LEN, SIGNATURE_LEN};
use super::KeyVault;

/// [`KeyVault`] holding at most one secp256k1 key in memory.
///
/// The vault starts locked (empty) or unlocked; `lock()` drops the key.
/// `k256::ecdsa::SigningKey` zeroizes itself on drop.
#[derive(Default)]
pub struct LocalKeyVault {
    key: RwLock<Option<SigningKey>>,
}

impl LocalKeyVault {
    /// An empty (locked) vault.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A vault holding a freshly generated key.
    pub fn generate() -> Self {
        let vault = Self::empty();
        vault.install(crypto::generate_signing_key());
        vault
    }

    /// A vault holding the given secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; PRIVATE_KEY_LEN]) -> Result<Self> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| HandshakeError::Crypto(format!("Invalid secret key: {e}")))?;
        let vault = Self::empty();
        vault.install(key);
        Ok(vault)
    }

    /// Replace the held key.
    pub fn install(&self, key: SigningKey) {
        if let Ok(mut guard) = self.key.write() {
            *guard = Some(key);
            info!("Identity key loaded into vault");
        }
    }

    /// Drop the held key.
    pub fn lock(&self) {
        if let Ok(mut guard) = self.key.write() {
            if guard.take().is_some() {
                debug!("Identity key dropped from vault");
            }
        }
    }

    /// Export the secret scalar for sealing into a key file.
    pub(crate) fn secret_bytes(&self) -> Result<Zeroizing<[u8; PRIVATE_KEY_LEN]>> {
        self.with_key(|key| Ok(Zeroizing::new(key.to_bytes().into())))
    }

    fn with_key<T>(&self, f: impl FnOnce(&SigningKey) -> Result<T>) -> Result<T> {
        let guard = self
            .key
            .read()
            .map_err(|_| HandshakeError::SigningUnavailable("Vault lock poisoned".into()))?;
        match guard.as_ref() {
            Some(key) => f(key),
            None => Err(HandshakeError::SigningUnavailable(
                "No identity key loaded".into(),
            )),
        }
    }
}

impl std::fmt::Debug for LocalKeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyVault")
            .field("has_key", &self.has_key())
            .finish()
    }
}

impl KeyVault for LocalKeyVault {
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN]> {
        self.with_key(|key| {
            let signature: Signature = key.sign_prehash(digest)?;
            let mut compact = [0u8; SIGNATURE_LEN];
            compact.copy_from_slice(&signature.to_bytes());
            Ok(compact)
        })
    }

    fn compressed_public_key(&self) -> Result<[u8; COMPRESSED_PUBKEY_LEN]> {
        self.with_key(crypto::compressed_public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use k256::ecdsa::VerifyingKey;

    #[test]
    fn test_empty_vault_is_unavailable() {
        let vault = LocalKeyVault::empty();
        assert!(!vault.has_key());
        assert!(matches!(
            vault.sign_digest(&[0u8; 32]),
            Err(HandshakeError::SigningUnavailable(_))
        ));
        assert!(matches!(
            vault.compressed_public_key(),
            Err(HandshakeError::SigningUnavailable(_))
        ));
    }

    #[test]
    fn test_sign_digest_verifies() {
        let vault = LocalKeyVault::generate();
        let digest = [7u8; 32];

        let sig_bytes = vault.sign_digest(&digest).unwrap();
        let pubkey = vault.compressed_public_key().unwrap();

        let verifying_key = VerifyingKey::from_sec1_bytes(&pubkey).unwrap();
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        assert!(verifying_key.verify_prehash(&digest, &signature).is_ok());
    }

    #[test]
    fn test_lock_drops_key() {
        let vault = LocalKeyVault::generate();
        assert!(vault.has_key());
        vault.lock();
        assert!(!vault.has_key());
    }

    #[test]
    fn test_from_secret_bytes_is_stable() {
        let original = LocalKeyVault::generate();
        let secret = original.secret_bytes().unwrap();
        let restored = LocalKeyVault::from_secret_bytes(&secret).unwrap();
        assert_eq!(
            original.compressed_public_key().unwrap(),
            restored.compressed_public_key().unwrap()
        );
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let vault = LocalKeyVault::generate();
        let secret = hex::encode(*vault.secret_bytes().unwrap());
        let debug = format!("{:?}", vault);
        assert!(!debug.contains(&secret));
        assert!(debug.contains("has_key: true"));
    }
}
