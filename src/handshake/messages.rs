//! Handshake message schemas.
//!
//! Field names are camelCase on the wire so both applications agree on the
//! JSON stored under each key.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::signing::{
    address_matches_public_key, canonical, decode_signature_base64, verify_signature,
    SignatureEncoding,
};
use crate::store::keys;
use crate::types::{HandshakeError, Result};

use super::allowlist::CallbackPolicy;

/// The kinds of message the handshake store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    AuthRequest,
    AuthSession,
    AuthDenied,
    PostSignRequest,
    PostSignResponse,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::AuthRequest,
        MessageKind::AuthSession,
        MessageKind::AuthDenied,
        MessageKind::PostSignRequest,
        MessageKind::PostSignResponse,
    ];

    /// Shared-store key for this kind.
    pub fn key(self) -> &'static str {
        match self {
            Self::AuthRequest => keys::AUTH_REQUEST,
            Self::AuthSession => keys::AUTH_RESPONSE,
            Self::AuthDenied => keys::AUTH_DENIED,
            Self::PostSignRequest => keys::POST_SIGN_REQUEST,
            Self::PostSignResponse => keys::POST_SIGN_RESPONSE,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AuthRequest => "auth_request",
            Self::AuthSession => "auth_session",
            Self::AuthDenied => "auth_denied",
            Self::PostSignRequest => "post_sign_request",
            Self::PostSignResponse => "post_sign_response",
        };
        f.write_str(name)
    }
}

/// Context a message needs to validate itself.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub policy: &'a CallbackPolicy,
    pub bundle_id: &'a str,
}

/// A message stored under a well-known key with a TTL.
pub trait HandshakeMessage: Serialize + DeserializeOwned + Send {
    const KIND: MessageKind;

    fn issued_at(&self) -> u64;
    fn expires_at(&self) -> u64;

    /// Set `issuedAt`/`expiresAt` at write time.
    fn stamp(&mut self, issued_at: u64, expires_at: u64);

    /// Fill in store-generated fields before the first write.
    fn prepare(&mut self) {}

    /// Schema checks beyond deserialization.
    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()>;
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HandshakeError::Validation(format!("Missing field {field}")));
    }
    Ok(())
}

fn require_hex(field: &str, value: &str, expected_len: Option<usize>) -> Result<()> {
    require(field, value)?;
    let bytes = hex::decode(value)
        .map_err(|e| HandshakeError::Validation(format!("Field {field} is not hex: {e}")))?;
    if let Some(len) = expected_len {
        if bytes.len() != len {
            return Err(HandshakeError::Validation(format!(
                "Field {field} must be {len} bytes, got {}",
                bytes.len()
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Auth request / session / denial
// =============================================================================

/// Authentication request written by the requesting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub app_name: String,
    pub app_id: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(rename = "callbackURL")]
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub issued_at: u64,
    #[serde(default)]
    pub expires_at: u64,
}

impl AuthRequest {
    pub fn new(
        app_name: impl Into<String>,
        app_id: impl Into<String>,
        permissions: impl IntoIterator<Item = impl Into<String>>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_id: app_id.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
            callback_url: callback_url.into(),
            username: None,
            nonce: String::new(),
            issued_at: 0,
            expires_at: 0,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }
}

impl HandshakeMessage for AuthRequest {
    const KIND: MessageKind = MessageKind::AuthRequest;

    fn issued_at(&self) -> u64 {
        self.issued_at
    }

    fn expires_at(&self) -> u64 {
        self.expires_at
    }

    fn stamp(&mut self, issued_at: u64, expires_at: u64) {
        self.issued_at = issued_at;
        self.expires_at = expires_at;
    }

    fn prepare(&mut self) {
        if self.nonce.is_empty() {
            self.nonce = generate_nonce();
        }
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        require("appName", &self.app_name)?;
        require("appId", &self.app_id)?;
        require("nonce", &self.nonce)?;
        if !ctx.policy.allows(&self.callback_url) {
            return Err(HandshakeError::Validation(format!(
                "Callback URL not allowed: {}",
                self.callback_url
            )));
        }
        Ok(())
    }
}

/// Signed session written by the holder once the user approves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub identity_address: String,
    pub session_token: String,
    /// Base58 signature over `LASKO_AUTH:<address>:<sessionToken>`
    pub signature: String,
    /// Compressed secp256k1 public key (hex) that produced `signature`
    pub public_key: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Nonce of the request this session answers
    pub request_nonce: String,
    #[serde(default)]
    pub issued_at: u64,
    #[serde(default)]
    pub expires_at: u64,
}

impl AuthSession {
    /// The canonical message the signature must cover.
    pub fn canonical_message(&self) -> Result<String> {
        canonical::auth_session_message(&self.identity_address, &self.session_token)
    }

    /// Check the signature and that the address derives from the key.
    pub fn verify(&self) -> Result<()> {
        if !address_matches_public_key(&self.identity_address, &self.public_key) {
            return Err(HandshakeError::Validation(
                "Identity address does not match public key".into(),
            ));
        }
        verify_signature(
            &self.canonical_message()?,
            &self.signature,
            SignatureEncoding::Base58,
            &self.public_key,
        )
    }
}

impl HandshakeMessage for AuthSession {
    const KIND: MessageKind = MessageKind::AuthSession;

    fn issued_at(&self) -> u64 {
        self.issued_at
    }

    fn expires_at(&self) -> u64 {
        self.expires_at
    }

    fn stamp(&mut self, issued_at: u64, expires_at: u64) {
        self.issued_at = issued_at;
        self.expires_at = expires_at;
    }

    fn validate(&self, _ctx: &ValidationContext<'_>) -> Result<()> {
        require("identityAddress", &self.identity_address)?;
        require("sessionToken", &self.session_token)?;
        require("signature", &self.signature)?;
        require("requestNonce", &self.request_nonce)?;
        require_hex("publicKey", &self.public_key, Some(crate::vault::COMPRESSED_PUBKEY_LEN))?;
        self.verify()
    }
}

/// Explicit denial, so requesters need not infer it from a timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDenied {
    /// Nonce of the denied request
    pub nonce: String,
    #[serde(default)]
    pub denied_at: u64,
    #[serde(default)]
    pub expires_at: u64,
}

impl AuthDenied {
    pub fn for_request(request: &AuthRequest) -> Self {
        Self {
            nonce: request.nonce.clone(),
            denied_at: 0,
            expires_at: 0,
        }
    }
}

impl HandshakeMessage for AuthDenied {
    const KIND: MessageKind = MessageKind::AuthDenied;

    fn issued_at(&self) -> u64 {
        self.denied_at
    }

    fn expires_at(&self) -> u64 {
        self.expires_at
    }

    fn stamp(&mut self, issued_at: u64, expires_at: u64) {
        self.denied_at = issued_at;
        self.expires_at = expires_at;
    }

    fn validate(&self, _ctx: &ValidationContext<'_>) -> Result<()> {
        require("nonce", &self.nonce)
    }
}

// =============================================================================
// Post signing
// =============================================================================

/// Request to sign a content hash before publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSignRequest {
    pub content_hash_hex: String,
    /// Epoch milliseconds, bound into the canonical message
    pub timestamp: u64,
    #[serde(default)]
    pub issued_at: u64,
    #[serde(default)]
    pub expires_at: u64,
}

impl PostSignRequest {
    pub fn new(content_hash_hex: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            content_hash_hex: content_hash_hex.into().to_ascii_lowercase(),
            timestamp: timestamp_ms,
            issued_at: 0,
            expires_at: 0,
        }
    }
}

impl HandshakeMessage for PostSignRequest {
    const KIND: MessageKind = MessageKind::PostSignRequest;

    fn issued_at(&self) -> u64 {
        self.issued_at
    }

    fn expires_at(&self) -> u64 {
        self.expires_at
    }

    fn stamp(&mut self, issued_at: u64, expires_at: u64) {
        self.issued_at = issued_at;
        self.expires_at = expires_at;
    }

    fn validate(&self, _ctx: &ValidationContext<'_>) -> Result<()> {
        require_hex("contentHashHex", &self.content_hash_hex, None)?;
        if self.timestamp == 0 {
            return Err(HandshakeError::Validation("Missing field timestamp".into()));
        }
        Ok(())
    }
}

/// Signature over a post-sign request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSignResponse {
    pub signature_base64: String,
    pub pubkey_compressed_hex: String,
    /// Echo of the request timestamp (epoch milliseconds)
    pub timestamp: u64,
    /// Echo of the signed content hash
    pub content_hash_hex: String,
    /// Identity address bound into the signature
    pub address: String,
    #[serde(default)]
    pub issued_at: u64,
    #[serde(default)]
    pub expires_at: u64,
}

impl PostSignResponse {
    pub fn canonical_message(&self, bundle_id: &str) -> Result<String> {
        canonical::post_sign_message(
            &self.content_hash_hex,
            self.timestamp,
            &self.address,
            bundle_id,
        )
    }

    /// Whether this response answers `request`.
    pub fn answers(&self, request: &PostSignRequest) -> bool {
        self.content_hash_hex == request.content_hash_hex && self.timestamp == request.timestamp
    }
}

impl HandshakeMessage for PostSignResponse {
    const KIND: MessageKind = MessageKind::PostSignResponse;

    fn issued_at(&self) -> u64 {
        self.issued_at
    }

    fn expires_at(&self) -> u64 {
        self.expires_at
    }

    fn stamp(&mut self, issued_at: u64, expires_at: u64) {
        self.issued_at = issued_at;
        self.expires_at = expires_at;
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        decode_signature_base64(&self.signature_base64)?;
        require_hex(
            "pubkeyCompressedHex",
            &self.pubkey_compressed_hex,
            Some(crate::vault::COMPRESSED_PUBKEY_LEN),
        )?;
        require("address", &self.address)?;
        if !address_matches_public_key(&self.address, &self.pubkey_compressed_hex) {
            return Err(HandshakeError::Validation(
                "Post-sign address does not match public key".into(),
            ));
        }
        verify_signature(
            &self.canonical_message(ctx.bundle_id)?,
            &self.signature_base64,
            SignatureEncoding::Base64,
            &self.pubkey_compressed_hex,
        )
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_nonce() -> String {
    hex::encode(crate::vault::crypto::generate_random_bytes::<32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(policy: &CallbackPolicy) -> ValidationContext<'_> {
        ValidationContext {
            policy,
            bundle_id: "com.lasko.app",
        }
    }

    #[test]
    fn test_keys_match_wire_schema() {
        assert_eq!(MessageKind::AuthRequest.key(), "lasko_auth_request");
        assert_eq!(MessageKind::AuthSession.key(), "lasko_auth_response");
        assert_eq!(MessageKind::PostSignRequest.key(), "lasko_post_sign_request");
        assert_eq!(MessageKind::PostSignResponse.key(), "lasko_post_sign_response");
    }

    #[test]
    fn test_auth_request_wire_names() {
        let mut request = AuthRequest::new("LASKO", "com.lasko.app", ["post", "read"], "lasko://auth/callback")
            .with_username("alice");
        request.prepare();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["appName"], "LASKO");
        assert_eq!(json["callbackURL"], "lasko://auth/callback");
        assert_eq!(json["permissions"], serde_json::json!(["post", "read"]));
        assert_eq!(json["nonce"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_prepare_keeps_existing_nonce() {
        let mut request = AuthRequest::new("a", "b", ["read"], "lasko://auth/callback").with_nonce("abc");
        request.prepare();
        assert_eq!(request.nonce, "abc");
    }

    #[test]
    fn test_auth_request_validation() {
        let policy = CallbackPolicy::default();
        let mut request = AuthRequest::new("LASKO", "com.lasko.app", ["read"], "lasko://auth/callback");
        assert!(request.validate(&ctx(&policy)).is_err(), "nonce required");

        request.prepare();
        assert!(request.validate(&ctx(&policy)).is_ok());

        request.callback_url = "https://evil.example/callback".into();
        assert!(request.validate(&ctx(&policy)).is_err());
    }

    #[test]
    fn test_post_sign_request_lowercases_hash() {
        let request = PostSignRequest::new("DEADBEEF", 1);
        assert_eq!(request.content_hash_hex, "deadbeef");
    }

    #[test]
    fn test_post_sign_request_validation() {
        let policy = CallbackPolicy::default();
        assert!(PostSignRequest::new("zz", 1).validate(&ctx(&policy)).is_err());
        assert!(PostSignRequest::new("abcd", 0).validate(&ctx(&policy)).is_err());
        assert!(PostSignRequest::new("abcd", 5).validate(&ctx(&policy)).is_ok());
    }

    #[test]
    fn test_missing_fields_fail_deserialization() {
        let result: std::result::Result<AuthSession, _> =
            serde_json::from_str(r#"{"identityAddress":"L1"}"#);
        assert!(result.is_err());
    }
}
