//! Identity address derivation.
//!
//! `L` + Base58(first 20 bytes of SHA-256(compressed public key)).

use sha2::{Digest, Sha256};

use crate::vault::COMPRESSED_PUBKEY_LEN;

pub const ADDRESS_PREFIX: char = 'L';
const ADDRESS_HASH_LEN: usize = 20;

pub fn identity_address(public_key: &[u8; COMPRESSED_PUBKEY_LEN]) -> String {
    let hash = Sha256::digest(public_key);
    format!(
        "{ADDRESS_PREFIX}{}",
        bs58::encode(&hash[..ADDRESS_HASH_LEN]).into_string()
    )
}

/// Whether `address` was derived from the hex-encoded compressed key.
pub fn address_matches_public_key(address: &str, public_key_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key) = <[u8; COMPRESSED_PUBKEY_LEN]>::try_from(bytes.as_slice()) else {
        return false;
    };
    identity_address(&key) == address
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_shape() {
        let address = identity_address(&[2u8; COMPRESSED_PUBKEY_LEN]);
        assert!(address.starts_with(ADDRESS_PREFIX));
        assert!(!address.contains(':'));
        assert!(!address.contains('|'));
        assert_eq!(address, identity_address(&[2u8; COMPRESSED_PUBKEY_LEN]));
    }

    #[test]
    fn test_address_matches() {
        let key = [3u8; COMPRESSED_PUBKEY_LEN];
        let address = identity_address(&key);
        assert!(address_matches_public_key(&address, &hex::encode(key)));
        assert!(!address_matches_public_key(&address, &hex::encode([4u8; 33])));
        assert!(!address_matches_public_key(&address, "not-hex"));
    }
}
