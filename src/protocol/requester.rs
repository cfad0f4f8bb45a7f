//! Requester side of the auth handshake.

use tracing::{debug, info};

use crate::handshake::{AuthDenied, AuthRequest, AuthSession, HandshakeStore};
use crate::types::Result;

use super::state::HandshakeState;

/// What a requester poll observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequesterEvent {
    /// No request in flight
    Idle,
    /// Request written, no answer yet
    Waiting,
    /// The holder approved; the session has been consumed
    Approved(AuthSession),
    /// The holder explicitly denied the request
    Denied,
    /// The request expired unanswered
    TimedOut,
}

/// Requester state machine
///
/// Sessions are consumed with an atomic claim, and only a session whose
/// `requestNonce` matches the pending request is accepted. Anything else
/// left in the store from an earlier run is discarded without an event.
pub struct RequesterProtocol {
    store: HandshakeStore,
    pending: Option<AuthRequest>,
    state: HandshakeState,
}

impl RequesterProtocol {
    pub fn new(store: HandshakeStore) -> Self {
        Self {
            store,
            pending: None,
            state: HandshakeState::NoRequest,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn pending(&self) -> Option<&AuthRequest> {
        self.pending.as_ref()
    }

    /// Write a request, replacing any in flight.
    pub fn submit(&mut self, request: AuthRequest) -> Result<AuthRequest> {
        self.discard_stale();
        let written = self.store.put(request)?;
        info!(
            app_id = %written.app_id,
            expires_at = written.expires_at,
            "Auth request submitted"
        );
        self.pending = Some(written.clone());
        self.state = HandshakeState::RequestPending;
        Ok(written)
    }

    /// Re-read the store and advance.
    pub fn poll(&mut self) -> RequesterEvent {
        let Some(pending) = self.pending.clone() else {
            self.discard_stale();
            return RequesterEvent::Idle;
        };

        if let Some(denied) = self.store.get::<AuthDenied>() {
            if denied.nonce == pending.nonce {
                self.settle(HandshakeState::Consumed);
                if let Err(e) = self.store.clear::<AuthDenied>() {
                    debug!(error = %e, "Failed to clear denial");
                }
                info!(app_id = %pending.app_id, "Auth request denied");
                return RequesterEvent::Denied;
            }
        }

        if let Some(session) = self.store.take::<AuthSession>() {
            if session.request_nonce == pending.nonce {
                self.settle(HandshakeState::Consumed);
                info!(
                    identity = %session.identity_address,
                    "Auth session received"
                );
                return RequesterEvent::Approved(session);
            }
            debug!("Discarded session for a different request");
        }

        if self.store.clock().now_secs() > pending.expires_at {
            if let Err(e) = self.store.clear::<AuthRequest>() {
                debug!(error = %e, "Failed to clear expired request");
            }
            self.settle(HandshakeState::Expired);
            info!(app_id = %pending.app_id, "Auth request timed out");
            return RequesterEvent::TimedOut;
        }

        RequesterEvent::Waiting
    }

    /// Abandon the pending request.
    pub fn cancel(&mut self) -> Result<()> {
        if self.pending.take().is_some() {
            self.store.clear::<AuthRequest>()?;
            self.state = HandshakeState::NoRequest;
        }
        Ok(())
    }

    fn settle(&mut self, state: HandshakeState) {
        self.pending = None;
        self.state = state;
    }

    /// Drop sessions and denials that no pending request can claim.
    fn discard_stale(&self) {
        if self.store.take::<AuthSession>().is_some() {
            debug!("Discarded stale auth session");
        }
        if self.store.get::<AuthDenied>().is_some() {
            if let Err(e) = self.store.clear::<AuthDenied>() {
                debug!(error = %e, "Failed to clear stale denial");
            }
        }
    }
}

impl std::fmt::Debug for RequesterProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequesterProtocol")
            .field("state", &self.state)
            .field("pending", &self.pending.as_ref().map(|r| &r.nonce))
            .finish()
    }
}
