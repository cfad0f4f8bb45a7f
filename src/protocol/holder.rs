//! Holder side of the auth handshake.
//!
//! The holder owns the identity key. It polls for requests, asks the user,
//! and writes either a signed session or an explicit denial. The request is
//! cleared only after the answer is durable, so a crash in between leaves a
//! request that can be answered again rather than a lost one.

use tracing::{debug, info, warn};

use crate::callback::CallbackStatus;
use crate::handshake::{AuthDenied, AuthRequest, AuthSession, HandshakeStore, MessageKind};
use crate::signing::{canonical, SignatureEncoding, SigningService};
use crate::types::{HandshakeError, Result};
use crate::vault::crypto::generate_random_bytes;

use super::state::{Decision, HandshakeState};

/// What a holder poll observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderEvent {
    /// Nothing to do
    Idle,
    /// A request is waiting but no identity is unlocked
    AwaitingUnlock,
    /// A new request needs the user's decision
    DecisionRequired(AuthRequest),
    /// The request shown to the user is still waiting
    AwaitingDecision,
    /// The request expired before a decision
    Expired,
    /// The request disappeared before a decision
    Withdrawn,
    /// The requester consumed our response
    ResponseConsumed,
}

/// Result of answering a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    /// Session written for an approval
    pub session: Option<AuthSession>,
    /// The request's callback URL; the status is appended on delivery
    pub callback_url: String,
}

impl DecisionOutcome {
    pub fn status(&self) -> CallbackStatus {
        match self.decision {
            Decision::Approve => CallbackStatus::Approved,
            Decision::Deny => CallbackStatus::Declined,
        }
    }
}

/// Holder state machine
pub struct HolderProtocol {
    store: HandshakeStore,
    signer: SigningService,
    state: HandshakeState,
    current: Option<AuthRequest>,
    /// Nonce of the last request answered, so a request whose removal
    /// failed is cleared again instead of being re-signed.
    answered_nonce: Option<String>,
}

impl HolderProtocol {
    pub fn new(store: HandshakeStore, signer: SigningService) -> Self {
        Self {
            store,
            signer,
            state: HandshakeState::NoRequest,
            current: None,
            answered_nonce: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The request currently shown to the user.
    pub fn current_request(&self) -> Option<&AuthRequest> {
        self.current.as_ref()
    }

    /// Re-read the store and advance.
    pub fn poll(&mut self) -> HolderEvent {
        let Some(request) = self.store.get::<AuthRequest>() else {
            return self.on_no_request();
        };

        if self.answered_nonce.as_deref() == Some(request.nonce.as_str()) {
            debug!("Answered request still present, clearing again");
            if let Err(e) = self.store.clear::<AuthRequest>() {
                warn!(error = %e, "Failed to clear answered request");
            }
            return HolderEvent::Idle;
        }

        if !self.signer.is_available() {
            self.state = HandshakeState::RequestPending;
            self.current = None;
            return HolderEvent::AwaitingUnlock;
        }

        let same_request = self
            .current
            .as_ref()
            .is_some_and(|c| c.nonce == request.nonce);
        if same_request && self.state == HandshakeState::UserDeciding {
            return HolderEvent::AwaitingDecision;
        }

        info!(
            app_name = %request.app_name,
            app_id = %request.app_id,
            permissions = request.permissions.len(),
            "Auth request awaiting decision"
        );
        self.state = HandshakeState::UserDeciding;
        self.current = Some(request.clone());
        HolderEvent::DecisionRequired(request)
    }

    fn on_no_request(&mut self) -> HolderEvent {
        match self.state {
            HandshakeState::RequestPending | HandshakeState::UserDeciding => {
                let now = self.store.clock().now_secs();
                let expired = self
                    .current
                    .as_ref()
                    .map_or(true, |c| now > c.expires_at);
                self.current = None;
                if expired {
                    self.state = HandshakeState::Expired;
                    HolderEvent::Expired
                } else {
                    self.state = HandshakeState::NoRequest;
                    HolderEvent::Withdrawn
                }
            }
            HandshakeState::ResponseWritten
                if !self.store.is_present(MessageKind::AuthSession) =>
            {
                self.state = HandshakeState::Consumed;
                HolderEvent::ResponseConsumed
            }
            _ => HolderEvent::Idle,
        }
    }

    /// Answer the request currently awaiting a decision.
    pub async fn decide(&mut self, decision: Decision) -> Result<DecisionOutcome> {
        match decision {
            Decision::Approve => self.approve().await,
            Decision::Deny => self.deny(),
        }
    }

    /// Sign a session for the pending request and write it.
    pub async fn approve(&mut self) -> Result<DecisionOutcome> {
        let request = self.live_request()?;

        let address = self.signer.identity_address()?;
        let session_token = bs58::encode(generate_random_bytes::<32>()).into_string();
        let message = canonical::auth_session_message(&address, &session_token)?;
        let signed = self
            .signer
            .sign_in_background(message, SignatureEncoding::Base58)
            .await?;

        let session = AuthSession {
            identity_address: address,
            session_token,
            signature: signed.signature,
            public_key: signed.pubkey_compressed_hex,
            permissions: request.permissions.clone(),
            request_nonce: request.nonce.clone(),
            issued_at: 0,
            expires_at: 0,
        };

        // Response must be durable before the request goes away
        let session = self.store.put(session)?;
        self.finish_request(&request);
        self.state = HandshakeState::ResponseWritten;

        info!(
            app_id = %request.app_id,
            expires_at = session.expires_at,
            "Auth request approved"
        );

        Ok(DecisionOutcome {
            decision: Decision::Approve,
            callback_url: request.callback_url.clone(),
            session: Some(session),
        })
    }

    /// Deny the pending request.
    pub fn deny(&mut self) -> Result<DecisionOutcome> {
        let request = self.live_request()?;

        if let Err(e) = self.store.put(AuthDenied::for_request(&request)) {
            warn!(error = %e, "Failed to write denial, requester will time out");
        }
        self.finish_request(&request);
        self.state = HandshakeState::Consumed;

        info!(app_id = %request.app_id, "Auth request denied");

        Ok(DecisionOutcome {
            decision: Decision::Deny,
            callback_url: request.callback_url.clone(),
            session: None,
        })
    }

    /// The request under decision, re-checked against the store.
    fn live_request(&mut self) -> Result<AuthRequest> {
        if self.state != HandshakeState::UserDeciding {
            return Err(HandshakeError::Validation(format!(
                "No request awaiting decision (state: {})",
                self.state
            )));
        }
        let current = self
            .current
            .clone()
            .ok_or_else(|| HandshakeError::Validation("No request awaiting decision".into()))?;

        match self.store.get::<AuthRequest>() {
            Some(live) if live.nonce == current.nonce => Ok(live),
            _ => {
                let event = self.on_no_request();
                Err(HandshakeError::Validation(format!(
                    "Request is no longer pending ({event:?})"
                )))
            }
        }
    }

    fn finish_request(&mut self, request: &AuthRequest) {
        self.answered_nonce = Some(request.nonce.clone());
        self.current = None;
        if let Err(e) = self.store.clear::<AuthRequest>() {
            warn!(error = %e, "Failed to clear answered request, will retry on next poll");
        }
    }
}

impl std::fmt::Debug for HolderProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HolderProtocol")
            .field("state", &self.state)
            .field("current", &self.current.as_ref().map(|r| &r.app_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::handshake::HandshakeConfig;
    use crate::store::{keys, MemoryStore, SharedStore};
    use crate::vault::LocalKeyVault;
    use std::sync::Arc;

    struct Fixture {
        holder: HolderProtocol,
        store: HandshakeStore,
        shared: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        vault: Arc<LocalKeyVault>,
    }

    fn fixture() -> Fixture {
        let shared = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let store = HandshakeStore::new(shared.clone(), clock.clone(), HandshakeConfig::default());
        let vault = Arc::new(LocalKeyVault::generate());
        let holder = HolderProtocol::new(store.clone(), SigningService::new(vault.clone()));
        Fixture { holder, store, shared, clock, vault }
    }

    fn request() -> AuthRequest {
        AuthRequest::new("LASKO", "com.lasko.app", ["post", "read"], "lasko://auth/callback")
    }

    #[tokio::test]
    async fn test_approve_writes_session_then_clears_request() {
        let mut f = fixture();
        f.store.put(request()).unwrap();

        assert!(matches!(f.holder.poll(), HolderEvent::DecisionRequired(_)));
        assert_eq!(f.holder.poll(), HolderEvent::AwaitingDecision);

        f.clock.advance_secs(5);
        let outcome = f.holder.approve().await.unwrap();
        let session = outcome.session.clone().unwrap();

        assert_eq!(session.expires_at, session.issued_at + 86_400);
        assert_eq!(outcome.callback_url, "lasko://auth/callback");
        assert_eq!(outcome.status(), CallbackStatus::Approved);
        assert!(session.verify().is_ok());
        assert!(f.shared.get(keys::AUTH_REQUEST).unwrap().is_none());
        assert_eq!(f.holder.state(), HandshakeState::ResponseWritten);
        assert_eq!(f.holder.poll(), HolderEvent::Idle);
    }

    #[tokio::test]
    async fn test_response_consumed_is_observed() {
        let mut f = fixture();
        f.store.put(request()).unwrap();
        f.holder.poll();
        f.holder.approve().await.unwrap();

        f.store.clear::<AuthSession>().unwrap();
        assert_eq!(f.holder.poll(), HolderEvent::ResponseConsumed);
        assert_eq!(f.holder.state(), HandshakeState::Consumed);
    }

    #[test]
    fn test_deny_writes_denial() {
        let mut f = fixture();
        let written = f.store.put(request()).unwrap();
        f.holder.poll();

        let outcome = f.holder.deny().unwrap();
        assert_eq!(outcome.status(), CallbackStatus::Declined);
        assert!(outcome.session.is_none());

        let denied: AuthDenied = f.store.get().unwrap();
        assert_eq!(denied.nonce, written.nonce);
        assert!(f.store.get::<AuthRequest>().is_none());
        assert!(f.store.get::<AuthSession>().is_none());
        assert_eq!(f.holder.state(), HandshakeState::Consumed);
    }

    #[test]
    fn test_locked_identity_waits_until_expiry() {
        let mut f = fixture();
        f.vault.lock();
        f.store.put(request()).unwrap();

        assert_eq!(f.holder.poll(), HolderEvent::AwaitingUnlock);
        assert_eq!(f.holder.state(), HandshakeState::RequestPending);

        f.clock.advance_secs(121);
        assert_eq!(f.holder.poll(), HolderEvent::Expired);
        assert_eq!(f.holder.state(), HandshakeState::Expired);
    }

    #[tokio::test]
    async fn test_approve_after_expiry_fails() {
        let mut f = fixture();
        f.store.put(request()).unwrap();
        f.holder.poll();

        f.clock.advance_secs(121);
        assert!(f.holder.approve().await.is_err());
        assert_eq!(f.holder.state(), HandshakeState::Expired);
        assert!(f.store.get::<AuthSession>().is_none());
    }

    #[tokio::test]
    async fn test_locked_vault_aborts_approval_only() {
        let mut f = fixture();
        f.store.put(request()).unwrap();
        f.holder.poll();
        f.vault.lock();

        let err = f.holder.approve().await.unwrap_err();
        assert!(err.is_fatal_to_handshake());
        assert_eq!(f.holder.state(), HandshakeState::UserDeciding);
        assert!(f.store.get::<AuthRequest>().is_some());
    }

    #[test]
    fn test_overwritten_request_is_presented_again() {
        let mut f = fixture();
        f.store.put(request()).unwrap();
        f.holder.poll();

        let second = f.store.put(request().with_nonce("second")).unwrap();
        match f.holder.poll() {
            HolderEvent::DecisionRequired(r) => assert_eq!(r.nonce, second.nonce),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_withdrawn_request() {
        let mut f = fixture();
        f.store.put(request()).unwrap();
        f.holder.poll();
        f.store.clear::<AuthRequest>().unwrap();
        assert_eq!(f.holder.poll(), HolderEvent::Withdrawn);
        assert_eq!(f.holder.state(), HandshakeState::NoRequest);
    }

    #[test]
    fn test_decide_without_request_is_rejected() {
        let mut f = fixture();
        assert!(f.holder.deny().is_err());
    }
}
