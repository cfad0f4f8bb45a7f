//! Canonical Message Signing
//!
//! Binds a positionally-delimited message to the application's secp256k1
//! identity. One stateless [`SigningService`] is shared by every handshake
//! kind; the vault behind it is the single root of trust.
//!
//! ```text
//!  canonical::*_message(fields)  ──▶  SHA-256  ──▶  KeyVault::sign_digest
//!                                                        │
//!                     SignedMessage { signature (b58|b64), pubkey hex }
//! ```
//!
//! Cross-context reuse is prevented by the message shape, not the key:
//! each flow has its own tag, every relevant field is present, and no field
//! may contain its flow's separator.

pub mod address;
pub mod canonical;
pub mod encoding;
pub mod service;

pub use address::{address_matches_public_key, identity_address};
pub use encoding::{
    decode_signature_base58, decode_signature_base64, encode_signature_base58,
    encode_signature_base64, SignatureEncoding,
};
pub use service::{message_digest, verify_signature, SignedMessage, SigningService};
