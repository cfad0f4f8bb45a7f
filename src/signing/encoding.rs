//! Signature text encodings.
//!
//! Session signatures travel as Base58, challenge and post-sign signatures
//! as Base64. Downstream verifiers expect their own encoding, so the two
//! stay separate, explicitly named functions.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::types::{HandshakeError, Result};
use crate::vault::SIGNATURE_LEN;

/// Text encoding of a compact signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureEncoding {
    /// Legacy session tokens
    Base58,
    /// Challenge and post-sign flows
    Base64,
}

impl SignatureEncoding {
    pub fn encode(self, signature: &[u8; SIGNATURE_LEN]) -> String {
        match self {
            Self::Base58 => encode_signature_base58(signature),
            Self::Base64 => encode_signature_base64(signature),
        }
    }

    pub fn decode(self, text: &str) -> Result<[u8; SIGNATURE_LEN]> {
        match self {
            Self::Base58 => decode_signature_base58(text),
            Self::Base64 => decode_signature_base64(text),
        }
    }
}

pub fn encode_signature_base58(signature: &[u8; SIGNATURE_LEN]) -> String {
    bs58::encode(signature).into_string()
}

pub fn decode_signature_base58(text: &str) -> Result<[u8; SIGNATURE_LEN]> {
    let bytes = bs58::decode(text)
        .into_vec()
        .map_err(|e| HandshakeError::Validation(format!("Invalid base58 signature: {e}")))?;
    to_compact(bytes)
}

pub fn encode_signature_base64(signature: &[u8; SIGNATURE_LEN]) -> String {
    BASE64.encode(signature)
}

pub fn decode_signature_base64(text: &str) -> Result<[u8; SIGNATURE_LEN]> {
    let bytes = BASE64
        .decode(text)
        .map_err(|e| HandshakeError::Validation(format!("Invalid base64 signature: {e}")))?;
    to_compact(bytes)
}

fn to_compact(bytes: Vec<u8>) -> Result<[u8; SIGNATURE_LEN]> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        HandshakeError::Validation(format!(
            "Signature must be {SIGNATURE_LEN} bytes, got {len}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings_differ() {
        let sig = [0xABu8; SIGNATURE_LEN];
        let b58 = SignatureEncoding::Base58.encode(&sig);
        let b64 = SignatureEncoding::Base64.encode(&sig);
        assert_ne!(b58, b64);
        assert_eq!(decode_signature_base58(&b58).unwrap(), sig);
        assert_eq!(decode_signature_base64(&b64).unwrap(), sig);
    }

    #[test]
    fn test_cross_decoding_fails() {
        let sig = [0x11u8; SIGNATURE_LEN];
        let b64 = encode_signature_base64(&sig);
        // Base64 text is not a 64-byte Base58 payload
        assert!(decode_signature_base58(&b64).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = BASE64.encode([1u8; 32]);
        assert!(matches!(
            decode_signature_base64(&short),
            Err(HandshakeError::Validation(_))
        ));
    }
}
