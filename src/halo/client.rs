//! Remote authority HTTP client
//!
//! Two endpoints, each with a legacy alias tried when the primary path
//! returns 404:
//!
//! - `GET /challenge?address=&bundleId=` → `{nonce, ttlSeconds}` or `{data:{...}}`
//! - `POST /verify` → `{token, exp}` or `{token, expiresIn}`

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::types::{HandshakeError, Result};

/// Default per-call timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `exp` values above this are epoch milliseconds
const EXP_MILLIS_THRESHOLD: u64 = 1_000_000_000_000;

/// One-shot challenge issued by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub nonce: String,
    pub ttl_seconds: u64,
}

/// Challenge body in either the direct or the `data`-wrapped shape
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChallengeBody {
    Wrapped { data: Challenge },
    Direct(Challenge),
}

impl From<ChallengeBody> for Challenge {
    fn from(body: ChallengeBody) -> Self {
        match body {
            ChallengeBody::Wrapped { data } => data,
            ChallengeBody::Direct(challenge) => challenge,
        }
    }
}

/// Signed answer to a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub address: String,
    pub bundle_id: String,
    pub nonce: String,
    /// Base64 compact signature over `LASKO|<nonce>|<ttlSeconds>|<bundleId>`
    pub signature: String,
    /// Compressed public key (hex)
    pub pubkey: String,
}

/// Token grant; exactly one of `exp` / `expires_in` is expected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl VerifyResponse {
    /// Absolute expiry in epoch seconds.
    pub fn expires_at(&self, now_secs: u64) -> Result<u64> {
        match (self.exp, self.expires_in) {
            (Some(exp), _) if exp > EXP_MILLIS_THRESHOLD => Ok(exp / 1000),
            (Some(exp), _) => Ok(exp),
            (None, Some(expires_in)) => now_secs.checked_add(expires_in).ok_or_else(|| {
                HandshakeError::RemoteAuth(format!("expiresIn out of range: {expires_in}"))
            }),
            (None, None) => Err(HandshakeError::RemoteAuth(
                "Verify response has neither exp nor expiresIn".into(),
            )),
        }
    }
}

/// Remote authority interface
#[async_trait::async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn fetch_challenge(&self, address: &str, bundle_id: &str) -> Result<Challenge>;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse>;
}

/// Endpoint layout of the authority
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub challenge_path: String,
    pub verify_path: String,
    pub legacy_challenge_path: String,
    pub legacy_verify_path: String,
}

impl AuthorityConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            challenge_path: "/challenge".to_string(),
            verify_path: "/verify".to_string(),
            legacy_challenge_path: "/api/halo/challenge".to_string(),
            legacy_verify_path: "/api/halo/verify".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// reqwest-backed [`AuthorityClient`]
pub struct HttpAuthorityClient {
    config: AuthorityConfig,
    http_client: reqwest::Client,
}

impl HttpAuthorityClient {
    pub fn new(config: AuthorityConfig) -> Result<Self> {
        Url::parse(&config.base_url)
            .map_err(|e| HandshakeError::Config(format!("Invalid authority URL: {e}")))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("lasko-handshake/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HandshakeError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|e| HandshakeError::Config(format!("Invalid endpoint {joined}: {e}")))
    }

    async fn get_challenge(&self, path: &str, address: &str, bundle_id: &str) -> Result<reqwest::Response> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("address", address)
            .append_pair("bundleId", bundle_id);
        debug!(url = %url, "Fetching challenge");
        Ok(self.http_client.get(url).send().await?)
    }

    async fn post_verify(&self, path: &str, request: &VerifyRequest) -> Result<reqwest::Response> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Submitting challenge signature");
        Ok(self.http_client.post(url).json(request).send().await?)
    }
}

/// Map a non-success response to a remote-auth error.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(%status, "{} failed", what);
    Err(HandshakeError::RemoteAuth(format!(
        "{what} returned HTTP {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}

#[async_trait::async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn fetch_challenge(&self, address: &str, bundle_id: &str) -> Result<Challenge> {
        let mut response = self
            .get_challenge(&self.config.challenge_path, address, bundle_id)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Challenge endpoint not found, trying legacy path");
            response = self
                .get_challenge(&self.config.legacy_challenge_path, address, bundle_id)
                .await?;
        }

        let body: ChallengeBody = check_status(response, "Challenge")
            .await?
            .json()
            .await
            .map_err(|e| HandshakeError::RemoteAuth(format!("Unparsable challenge: {e}")))?;
        Ok(body.into())
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse> {
        let mut response = self.post_verify(&self.config.verify_path, request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Verify endpoint not found, trying legacy path");
            response = self
                .post_verify(&self.config.legacy_verify_path, request)
                .await?;
        }

        check_status(response, "Verify")
            .await?
            .json()
            .await
            .map_err(|e| HandshakeError::RemoteAuth(format!("Unparsable verify response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpAuthorityClient {
        HttpAuthorityClient::new(AuthorityConfig::new(server.uri())).unwrap()
    }

    fn verify_request() -> VerifyRequest {
        VerifyRequest {
            address: "Labc".into(),
            bundle_id: "com.lasko.app".into(),
            nonce: "n1".into(),
            signature: "sig".into(),
            pubkey: "02ab".into(),
        }
    }

    #[test]
    fn test_expiry_normalisation() {
        let absolute = VerifyResponse { token: "t".into(), exp: Some(2_000), expires_in: None };
        assert_eq!(absolute.expires_at(1_000).unwrap(), 2_000);

        let millis = VerifyResponse { token: "t".into(), exp: Some(1_700_000_000_000), expires_in: None };
        assert_eq!(millis.expires_at(0).unwrap(), 1_700_000_000);

        let relative = VerifyResponse { token: "t".into(), exp: None, expires_in: Some(3_600) };
        assert_eq!(relative.expires_at(1_000).unwrap(), 4_600);

        let neither = VerifyResponse { token: "t".into(), exp: None, expires_in: None };
        assert!(neither.expires_at(0).is_err());
    }

    #[test]
    fn test_huge_expires_in_is_an_error() {
        let huge = VerifyResponse { token: "t".into(), exp: None, expires_in: Some(u64::MAX) };
        assert!(matches!(
            huge.expires_at(1_700_000_000),
            Err(HandshakeError::RemoteAuth(_))
        ));
    }

    #[tokio::test]
    async fn test_challenge_both_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/challenge"))
            .and(query_param("address", "Labc"))
            .and(query_param("bundleId", "com.lasko.app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "nonce": "wrapped", "ttlSeconds": 60 }
            })))
            .mount(&server)
            .await;

        let challenge = client(&server)
            .fetch_challenge("Labc", "com.lasko.app")
            .await
            .unwrap();
        assert_eq!(challenge, Challenge { nonce: "wrapped".into(), ttl_seconds: 60 });

        let direct = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/challenge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nonce": "direct", "ttlSeconds": 90
            })))
            .mount(&direct)
            .await;
        let challenge = client(&direct).fetch_challenge("Labc", "b").await.unwrap();
        assert_eq!(challenge.nonce, "direct");
    }

    #[tokio::test]
    async fn test_legacy_fallback_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/challenge"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/halo/challenge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nonce": "legacy", "ttlSeconds": 30
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/halo/verify"))
            .and(body_json(serde_json::json!({
                "address": "Labc",
                "bundleId": "com.lasko.app",
                "nonce": "n1",
                "signature": "sig",
                "pubkey": "02ab"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "legacy-token", "expiresIn": 600
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.fetch_challenge("Labc", "com.lasko.app").await.unwrap().nonce, "legacy");
        let response = client.verify(&verify_request()).await.unwrap();
        assert_eq!(response.token, "legacy-token");
        assert_eq!(response.expires_in, Some(600));
    }

    #[tokio::test]
    async fn test_server_error_is_remote_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad signature"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).verify(&verify_request()).await.unwrap_err();
        assert!(matches!(err, HandshakeError::RemoteAuth(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_unparsable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/challenge"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).fetch_challenge("a", "b").await,
            Err(HandshakeError::RemoteAuth(_))
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpAuthorityClient::new(AuthorityConfig::new("not a url")).is_err());
    }
}
