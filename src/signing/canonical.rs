//! Canonical message construction.
//!
//! Every signed artifact binds all of its semantically relevant fields in a
//! fixed position behind a context tag. A field may never contain the
//! separator, otherwise `a|b` + `c` and `a` + `b|c` would sign the same bytes.

use crate::types::{HandshakeError, Result};

/// Tag for session-binding messages (`LASKO_AUTH:<address>:<sessionToken>`)
pub const AUTH_TAG: &str = "LASKO_AUTH";
pub const AUTH_SEPARATOR: char = ':';

/// Tag for Halo challenge messages (`LASKO|<nonce>|<ttlSeconds>|<bundleId>`)
pub const HALO_TAG: &str = "LASKO";
pub const HALO_SEPARATOR: char = '|';

/// Tag for content signing (`LASKO_POST|<hash>|<tsMs>|<address>|<bundleId>|v1`)
pub const POST_TAG: &str = "LASKO_POST";
pub const POST_SEPARATOR: char = '|';
pub const POST_VERSION: &str = "v1";

/// Join `tag` and `fields` with `separator`, rejecting empty fields and
/// fields that contain the separator.
pub fn join_fields(tag: &str, separator: char, fields: &[&str]) -> Result<String> {
    let mut message = String::from(tag);
    for (position, field) in fields.iter().enumerate() {
        if field.is_empty() {
            return Err(HandshakeError::Validation(format!(
                "Empty field at position {position} in {tag} message"
            )));
        }
        if field.contains(separator) {
            return Err(HandshakeError::Validation(format!(
                "Field at position {position} in {tag} message contains separator {separator:?}"
            )));
        }
        message.push(separator);
        message.push_str(field);
    }
    Ok(message)
}

/// Message binding an identity address to a session token.
pub fn auth_session_message(address: &str, session_token: &str) -> Result<String> {
    join_fields(AUTH_TAG, AUTH_SEPARATOR, &[address, session_token])
}

/// Message answering a Halo challenge.
pub fn halo_challenge_message(nonce: &str, ttl_seconds: u64, bundle_id: &str) -> Result<String> {
    let ttl = ttl_seconds.to_string();
    join_fields(HALO_TAG, HALO_SEPARATOR, &[nonce, &ttl, bundle_id])
}

/// Message authorising publication of a content hash.
pub fn post_sign_message(
    content_hash_hex: &str,
    timestamp_ms: u64,
    address: &str,
    bundle_id: &str,
) -> Result<String> {
    let ts = timestamp_ms.to_string();
    join_fields(
        POST_TAG,
        POST_SEPARATOR,
        &[content_hash_hex, &ts, address, bundle_id, POST_VERSION],
    )
}
