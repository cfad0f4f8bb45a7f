//! Bearer token service
//!
//! Keeps a token from the remote authority cached in the shared store and
//! refreshes it through a challenge/verify round trip once it is within
//! the refresh skew of expiring.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::poller::PollTask;
use crate::signing::{canonical, SignatureEncoding, SigningService};
use crate::store::{keys, SharedStore};
use crate::types::{HandshakeError, Result};

use super::client::{AuthorityClient, VerifyRequest};

/// Default refresh skew (seconds)
pub const DEFAULT_REFRESH_SKEW_SECS: u64 = 60;

const FLAG_SET: &[u8] = b"true";

#[derive(Debug, Clone)]
pub struct TokenServiceConfig {
    pub bundle_id: String,
    /// A cached token is reused only while it has more than this left
    pub refresh_skew_secs: u64,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            bundle_id: "com.lasko.app".to_string(),
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
        }
    }
}

/// Cached bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token: String,
    /// Absolute expiry, epoch seconds
    pub expires_at: u64,
}

impl BearerToken {
    /// Whether the token has more than `skew_secs` left.
    pub fn is_fresh(&self, now: u64, skew_secs: u64) -> bool {
        self.expires_at.saturating_sub(now) > skew_secs
    }

    pub fn is_valid(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("token_len", &self.token.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of [`TokenService::ensure_token`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// Cached token reused, no network call
    Cached(BearerToken),
    /// New token obtained from the authority
    Refreshed(BearerToken),
    /// Refresh failed; any still-valid cached token is kept as a fallback
    Degraded {
        fallback: Option<BearerToken>,
        reason: String,
    },
}

impl TokenState {
    /// A usable token, fresh or fallback.
    pub fn token(&self) -> Option<&BearerToken> {
        match self {
            Self::Cached(t) | Self::Refreshed(t) => Some(t),
            Self::Degraded { fallback, .. } => fallback.as_ref(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// The `halo_token_refresh_request` / `halo_token_refreshed_at` pair.
///
/// A fire-and-forget notification: the requester raises the flag and polls
/// the timestamp, the holder answers and lowers the flag.
#[derive(Clone)]
pub struct RefreshSignal {
    store: Arc<dyn SharedStore>,
}

impl RefreshSignal {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Ask the holder to refresh its token.
    pub fn request(&self) -> Result<()> {
        self.store.set(keys::HALO_TOKEN_REFRESH_REQUEST, FLAG_SET)
    }

    pub fn is_requested(&self) -> bool {
        matches!(
            self.store.get(keys::HALO_TOKEN_REFRESH_REQUEST),
            Ok(Some(v)) if v == FLAG_SET
        )
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(keys::HALO_TOKEN_REFRESH_REQUEST) {
            warn!(error = %e, "Failed to clear refresh request flag");
        }
    }

    pub fn mark_refreshed(&self, at_secs: u64) -> Result<()> {
        self.store
            .set(keys::HALO_TOKEN_REFRESHED_AT, at_secs.to_string().as_bytes())
    }

    /// When the holder last answered a refresh request (epoch seconds).
    pub fn last_refreshed_at(&self) -> Option<u64> {
        read_number(&*self.store, keys::HALO_TOKEN_REFRESHED_AT)
    }

    /// Whether a refresh was answered at or after `since`.
    pub fn refreshed_since(&self, since: u64) -> bool {
        self.last_refreshed_at().is_some_and(|t| t >= since)
    }
}

/// Challenge/response token service
pub struct TokenService {
    store: Arc<dyn SharedStore>,
    signer: SigningService,
    authority: Arc<dyn AuthorityClient>,
    clock: SharedClock,
    config: TokenServiceConfig,
    signal: RefreshSignal,
    authenticated: AtomicBool,
    refresh_lock: Mutex<()>,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn SharedStore>,
        signer: SigningService,
        authority: Arc<dyn AuthorityClient>,
        clock: SharedClock,
        config: TokenServiceConfig,
    ) -> Self {
        Self {
            signal: RefreshSignal::new(Arc::clone(&store)),
            store,
            signer,
            authority,
            clock,
            config,
            authenticated: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Whether the last refresh attempt (or cache check) yielded a token.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// The cached token, if one is stored and readable.
    pub fn cached_token(&self) -> Option<BearerToken> {
        let token = read_string(&*self.store, keys::HALO_ACCESS_TOKEN)?;
        let expires_at = read_number(&*self.store, keys::HALO_TOKEN_EXPIRES_AT)?;
        if token.is_empty() {
            return None;
        }
        Some(BearerToken { token, expires_at })
    }

    /// Return a token with more than the refresh skew left, refreshing if
    /// needed.
    ///
    /// Fails only when no identity is loaded. Every other failure degrades
    /// to [`TokenState::Degraded`] and leaves a still-valid cached token in
    /// place; the caller re-invokes on its own schedule.
    pub async fn ensure_token(&self) -> Result<TokenState> {
        let address = self.local_address()?;

        if let Some(token) = self.fresh_cached() {
            return Ok(TokenState::Cached(token));
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(token) = self.fresh_cached() {
            return Ok(TokenState::Cached(token));
        }
        Ok(self.refresh_locked(&address).await)
    }

    /// Run a challenge/verify round trip regardless of the cache.
    pub async fn refresh_now(&self) -> Result<TokenState> {
        let address = self.local_address()?;
        let _guard = self.refresh_lock.lock().await;
        Ok(self.refresh_locked(&address).await)
    }

    pub fn refresh_signal(&self) -> &RefreshSignal {
        &self.signal
    }

    pub fn request_refresh(&self) -> Result<()> {
        self.signal.request()
    }

    pub fn refresh_requested(&self) -> bool {
        self.signal.is_requested()
    }

    /// Act on a pending refresh request, if any.
    ///
    /// Returns `None` when no request was pending. The flag is cleared
    /// either way; `halo_token_refreshed_at` is written only when the
    /// refresh produced a token.
    pub async fn handle_refresh_request(&self) -> Result<Option<TokenState>> {
        if !self.signal.is_requested() {
            return Ok(None);
        }
        debug!("Token refresh requested");

        let outcome = self.refresh_now().await;
        self.signal.clear();

        let state = outcome?;
        if let TokenState::Refreshed(_) = state {
            self.signal.mark_refreshed(self.clock.now_secs())?;
        }
        Ok(Some(state))
    }

    pub fn last_refreshed_at(&self) -> Option<u64> {
        self.signal.last_refreshed_at()
    }

    pub fn refreshed_since(&self, since: u64) -> bool {
        self.signal.refreshed_since(since)
    }

    fn local_address(&self) -> Result<String> {
        self.signer.identity_address().map_err(|e| {
            self.authenticated.store(false, Ordering::SeqCst);
            HandshakeError::NotAuthenticated(format!("No local identity: {e}"))
        })
    }

    fn fresh_cached(&self) -> Option<BearerToken> {
        let now = self.clock.now_secs();
        let token = self
            .cached_token()
            .filter(|t| t.is_fresh(now, self.config.refresh_skew_secs))?;
        self.authenticated.store(true, Ordering::SeqCst);
        debug!(expires_at = token.expires_at, "Using cached bearer token");
        Some(token)
    }

    async fn refresh_locked(&self, address: &str) -> TokenState {
        match self.round_trip(address).await {
            Ok(token) => {
                self.authenticated.store(true, Ordering::SeqCst);
                info!(
                    token_len = token.token.len(),
                    expires_at = token.expires_at,
                    "Bearer token refreshed"
                );
                TokenState::Refreshed(token)
            }
            Err(e) => {
                self.authenticated.store(false, Ordering::SeqCst);
                warn!(error = %e, "Bearer token refresh failed");
                let now = self.clock.now_secs();
                TokenState::Degraded {
                    fallback: self.cached_token().filter(|t| t.is_valid(now)),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn round_trip(&self, address: &str) -> Result<BearerToken> {
        let bundle_id = &self.config.bundle_id;
        let challenge = self.authority.fetch_challenge(address, bundle_id).await?;

        let message =
            canonical::halo_challenge_message(&challenge.nonce, challenge.ttl_seconds, bundle_id)?;
        let signed = self
            .signer
            .sign_in_background(message, SignatureEncoding::Base64)
            .await?;

        let response = self
            .authority
            .verify(&VerifyRequest {
                address: address.to_string(),
                bundle_id: bundle_id.clone(),
                nonce: challenge.nonce,
                signature: signed.signature,
                pubkey: signed.pubkey_compressed_hex,
            })
            .await?;

        if response.token.is_empty() {
            return Err(HandshakeError::RemoteAuth("Empty token in verify response".into()));
        }
        let token = BearerToken {
            expires_at: response.expires_at(self.clock.now_secs())?,
            token: response.token,
        };

        self.store.set(keys::HALO_ACCESS_TOKEN, token.token.as_bytes())?;
        self.store.set(
            keys::HALO_TOKEN_EXPIRES_AT,
            token.expires_at.to_string().as_bytes(),
        )?;
        Ok(token)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

fn read_string(store: &dyn SharedStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
        Ok(None) => None,
        Err(e) => {
            debug!(key, error = %e, "Store read failed");
            None
        }
    }
}

fn read_number(store: &dyn SharedStore, key: &str) -> Option<u64> {
    read_string(store, key).and_then(|s| u64::from_str(s.trim()).ok())
}

/// Poll task that answers refresh requests from the other application.
pub struct RefreshFlagTask {
    service: Arc<TokenService>,
}

impl RefreshFlagTask {
    pub fn new(service: Arc<TokenService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl PollTask for RefreshFlagTask {
    fn name(&self) -> &str {
        "halo-refresh"
    }

    async fn tick(&self) {
        if let Err(e) = self.service.handle_refresh_request().await {
            debug!(error = %e, "Refresh request not handled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::halo::client::{Challenge, VerifyResponse};
    use crate::signing::verify_signature;
    use crate::store::MemoryStore;
    use crate::vault::LocalKeyVault;
    use std::sync::atomic::AtomicUsize;

    /// Authority that checks the challenge signature like the real one.
    struct MockAuthority {
        challenges: AtomicUsize,
        verifies: AtomicUsize,
        failing: AtomicBool,
        response: VerifyResponse,
    }

    impl MockAuthority {
        fn new(response: VerifyResponse) -> Self {
            Self {
                challenges: AtomicUsize::new(0),
                verifies: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                response,
            }
        }

        fn calls(&self) -> (usize, usize) {
            (
                self.challenges.load(Ordering::SeqCst),
                self.verifies.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait::async_trait]
    impl AuthorityClient for MockAuthority {
        async fn fetch_challenge(&self, _address: &str, _bundle_id: &str) -> Result<Challenge> {
            self.challenges.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(HandshakeError::RemoteAuth("connection refused".into()));
            }
            Ok(Challenge {
                nonce: "nonce-1".into(),
                ttl_seconds: 60,
            })
        }

        async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            let message =
                canonical::halo_challenge_message(&request.nonce, 60, &request.bundle_id)?;
            verify_signature(&message, &request.signature, SignatureEncoding::Base64, &request.pubkey)
                .map_err(|e| HandshakeError::RemoteAuth(e.to_string()))?;
            Ok(self.response.clone())
        }
    }

    struct Fixture {
        service: TokenService,
        authority: Arc<MockAuthority>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        vault: Arc<LocalKeyVault>,
    }

    fn fixture(response: VerifyResponse) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let vault = Arc::new(LocalKeyVault::generate());
        let authority = Arc::new(MockAuthority::new(response));
        let service = TokenService::new(
            store.clone(),
            SigningService::new(vault.clone()),
            authority.clone(),
            clock.clone(),
            TokenServiceConfig::default(),
        );
        Fixture { service, authority, store, clock, vault }
    }

    fn expires_in(secs: u64) -> VerifyResponse {
        VerifyResponse {
            token: "tok".into(),
            exp: None,
            expires_in: Some(secs),
        }
    }

    fn seed(store: &MemoryStore, token: &str, expires_at: u64) {
        store.set(keys::HALO_ACCESS_TOKEN, token.as_bytes()).unwrap();
        store
            .set(keys::HALO_TOKEN_EXPIRES_AT, expires_at.to_string().as_bytes())
            .unwrap();
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_calls() {
        let f = fixture(expires_in(3_600));
        seed(&f.store, "cached", 10_300);

        let state = f.service.ensure_token().await.unwrap();
        assert_eq!(state, TokenState::Cached(BearerToken { token: "cached".into(), expires_at: 10_300 }));
        assert_eq!(f.authority.calls(), (0, 0));
        assert!(f.service.is_authenticated());
    }

    #[tokio::test]
    async fn test_cache_miss_makes_one_round_trip() {
        let f = fixture(expires_in(3_600));

        let state = f.service.ensure_token().await.unwrap();
        assert_eq!(state, TokenState::Refreshed(BearerToken { token: "tok".into(), expires_at: 13_600 }));
        assert_eq!(f.authority.calls(), (1, 1));
        assert_eq!(f.service.cached_token().unwrap().expires_at, 13_600);

        // Second call is served from the cache
        f.service.ensure_token().await.unwrap();
        assert_eq!(f.authority.calls(), (1, 1));
    }

    #[tokio::test]
    async fn test_absolute_exp_is_stored() {
        let f = fixture(VerifyResponse { token: "abs".into(), exp: Some(20_000), expires_in: None });
        f.service.ensure_token().await.unwrap();
        assert_eq!(f.service.cached_token().unwrap().expires_at, 20_000);
    }

    #[tokio::test]
    async fn test_within_skew_triggers_refresh() {
        let f = fixture(expires_in(3_600));
        seed(&f.store, "old", 10_060);

        assert!(matches!(f.service.ensure_token().await.unwrap(), TokenState::Refreshed(_)));
        assert_eq!(f.authority.calls(), (1, 1));
    }

    #[tokio::test]
    async fn test_failure_degrades_and_keeps_valid_token() {
        let f = fixture(expires_in(3_600));
        seed(&f.store, "old", 10_030);
        f.authority.failing.store(true, Ordering::SeqCst);

        let state = f.service.ensure_token().await.unwrap();
        assert!(state.is_degraded());
        assert_eq!(state.token().map(|t| t.token.as_str()), Some("old"));
        assert!(!f.service.is_authenticated());
        assert_eq!(f.service.cached_token().unwrap().token, "old");
        assert_eq!(f.authority.calls(), (1, 0), "no synchronous retry");
    }

    #[tokio::test]
    async fn test_missing_identity_is_hard_failure() {
        let f = fixture(expires_in(3_600));
        f.vault.lock();

        let err = f.service.ensure_token().await.unwrap_err();
        assert!(matches!(err, HandshakeError::NotAuthenticated(_)));
        assert_eq!(f.authority.calls(), (0, 0));
    }

    #[tokio::test]
    async fn test_refresh_flag_flow() {
        let f = fixture(expires_in(3_600));
        seed(&f.store, "cached", 50_000);

        assert_eq!(f.service.handle_refresh_request().await.unwrap(), None);

        f.service.request_refresh().unwrap();
        assert!(f.service.refresh_requested());
        f.clock.advance_secs(5);

        let state = f.service.handle_refresh_request().await.unwrap().unwrap();
        assert!(matches!(state, TokenState::Refreshed(_)));
        assert!(!f.service.refresh_requested());
        assert_eq!(f.service.last_refreshed_at(), Some(10_005));
        assert!(f.service.refreshed_since(10_001));
        assert!(!f.service.refreshed_since(10_006));
    }

    #[tokio::test]
    async fn test_failed_refresh_request_clears_flag_without_timestamp() {
        let f = fixture(expires_in(3_600));
        f.authority.failing.store(true, Ordering::SeqCst);
        f.service.request_refresh().unwrap();

        let state = f.service.handle_refresh_request().await.unwrap().unwrap();
        assert!(state.is_degraded());
        assert!(!f.service.refresh_requested());
        assert_eq!(f.service.last_refreshed_at(), None);
    }

    #[test]
    fn test_token_debug_hides_value() {
        let token = BearerToken { token: "secret-token".into(), expires_at: 1 };
        assert!(!format!("{token:?}").contains("secret"));
    }
}
