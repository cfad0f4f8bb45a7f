//! Inbound auth deep links.
//!
//! `scheme://auth?app=..&appId=..&permissions=a,b&callback=..&username=..&nonce=..`

use std::collections::BTreeSet;

use url::Url;

use crate::types::{HandshakeError, Result};

use super::allowlist::CALLBACK_HOST;
use super::messages::AuthRequest;

/// Parse an inbound auth URL into a request.
///
/// Only the scheme and host are checked here; the callback URL is left to
/// the handshake store's allowlist.
pub fn parse_auth_url(raw: &str, scheme: &str) -> Result<AuthRequest> {
    let url = Url::parse(raw)
        .map_err(|e| HandshakeError::Validation(format!("Invalid auth URL: {e}")))?;

    if !url.scheme().eq_ignore_ascii_case(scheme) {
        return Err(HandshakeError::Validation(format!(
            "Unexpected scheme {}",
            url.scheme()
        )));
    }
    if !url
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(CALLBACK_HOST))
    {
        return Err(HandshakeError::Validation("Auth URL host must be auth".into()));
    }

    let mut app_name = None;
    let mut app_id = None;
    let mut permissions = BTreeSet::new();
    let mut callback = None;
    let mut username = None;
    let mut nonce = None;

    for (name, value) in url.query_pairs() {
        let value = value.into_owned();
        match name.as_ref() {
            "app" => app_name = Some(value),
            "appId" => app_id = Some(value),
            "permissions" => {
                permissions = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "callback" => callback = Some(value),
            "username" if !value.is_empty() => username = Some(value),
            "nonce" if !value.is_empty() => nonce = Some(value),
            _ => {}
        }
    }

    let missing = |field: &str| HandshakeError::Validation(format!("Auth URL missing {field}"));
    let mut request = AuthRequest::new(
        app_name.ok_or_else(|| missing("app"))?,
        app_id.ok_or_else(|| missing("appId"))?,
        permissions,
        callback.ok_or_else(|| missing("callback"))?,
    );
    request.username = username;
    if let Some(nonce) = nonce {
        request.nonce = nonce;
    }
    Ok(request)
}

/// Build the inbound auth URL for a request.
pub fn build_auth_url(request: &AuthRequest, scheme: &str) -> String {
    let permissions = request
        .permissions
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let mut url = format!(
        "{scheme}://{CALLBACK_HOST}?app={}&appId={}&permissions={}&callback={}",
        urlencoding::encode(&request.app_name),
        urlencoding::encode(&request.app_id),
        urlencoding::encode(&permissions),
        urlencoding::encode(&request.callback_url),
    );
    if let Some(username) = &request.username {
        url.push_str(&format!("&username={}", urlencoding::encode(username)));
    }
    if !request.nonce.is_empty() {
        url.push_str(&format!("&nonce={}", urlencoding::encode(&request.nonce)));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let request = parse_auth_url(
            "lasko://auth?app=LASKO%20Social&appId=com.lasko.app&permissions=post,read&callback=lasko%3A%2F%2Fauth%2Fcallback&username=alice&nonce=abc",
            "lasko",
        )
        .unwrap();

        assert_eq!(request.app_name, "LASKO Social");
        assert_eq!(request.app_id, "com.lasko.app");
        assert_eq!(request.callback_url, "lasko://auth/callback");
        assert_eq!(request.username.as_deref(), Some("alice"));
        assert_eq!(request.nonce, "abc");
        assert!(request.permissions.contains("post"));
        assert!(request.permissions.contains("read"));
    }

    #[test]
    fn test_build_then_parse_preserves_fields() {
        let request = AuthRequest::new("A & B", "id", ["read", "write"], "lasko://auth/callback")
            .with_username("bob")
            .with_nonce("n-1");
        let url = build_auth_url(&request, "lasko");
        assert_eq!(parse_auth_url(&url, "lasko").unwrap(), request);
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(parse_auth_url("lasko://auth?app=x&appId=y", "lasko").is_err());
        assert!(parse_auth_url("other://auth?app=x&appId=y&callback=z", "lasko").is_err());
        assert!(parse_auth_url("lasko://sign?app=x&appId=y&callback=z", "lasko").is_err());
    }
}
