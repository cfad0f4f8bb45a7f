//! Typed handshake store
//!
//! The single place where TTL, nonce, and callback-allowlist checks are
//! enforced. Every read validates or discards; nothing malformed, expired,
//! or disallowed ever reaches the protocol layer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::store::SharedStore;
use crate::types::Result;

use super::allowlist::CallbackPolicy;
use super::messages::{HandshakeMessage, MessageKind, ValidationContext};

/// Default auth request TTL (seconds)
pub const AUTH_REQUEST_TTL_SECS: u64 = 120;

/// Default auth session TTL (seconds)
pub const AUTH_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Default denial TTL (seconds)
pub const AUTH_DENIED_TTL_SECS: u64 = 120;

/// Default post-sign request/response TTL (seconds)
pub const POST_SIGN_TTL_SECS: u64 = 120;

/// Handshake store configuration
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub auth_request_ttl_secs: u64,
    pub auth_session_ttl_secs: u64,
    pub auth_denied_ttl_secs: u64,
    pub post_sign_ttl_secs: u64,
    /// Bundle identifier bound into post-sign and challenge messages
    pub bundle_id: String,
    pub callback_policy: CallbackPolicy,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            auth_request_ttl_secs: AUTH_REQUEST_TTL_SECS,
            auth_session_ttl_secs: AUTH_SESSION_TTL_SECS,
            auth_denied_ttl_secs: AUTH_DENIED_TTL_SECS,
            post_sign_ttl_secs: POST_SIGN_TTL_SECS,
            bundle_id: "com.lasko.app".to_string(),
            callback_policy: CallbackPolicy::default(),
        }
    }
}

impl HandshakeConfig {
    pub fn ttl_for(&self, kind: MessageKind) -> u64 {
        match kind {
            MessageKind::AuthRequest => self.auth_request_ttl_secs,
            MessageKind::AuthSession => self.auth_session_ttl_secs,
            MessageKind::AuthDenied => self.auth_denied_ttl_secs,
            MessageKind::PostSignRequest | MessageKind::PostSignResponse => {
                self.post_sign_ttl_secs
            }
        }
    }
}

/// Why a stored entry was discarded on read
enum Discard {
    Malformed(String),
    Rejected(String),
    Expired { expires_at: u64, now: u64 },
}

/// Typed, validated access to the shared store.
#[derive(Clone)]
pub struct HandshakeStore {
    store: Arc<dyn SharedStore>,
    clock: SharedClock,
    config: Arc<HandshakeConfig>,
}

impl HandshakeStore {
    pub fn new(store: Arc<dyn SharedStore>, clock: SharedClock, config: HandshakeConfig) -> Self {
        Self {
            store,
            clock,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The raw store, for keys outside the typed schema.
    pub fn shared(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    /// Write a message, overwriting any prior value of the same kind.
    ///
    /// Stamps `issuedAt`/`expiresAt` from the clock and lets the message
    /// fill store-generated fields (the auth request nonce). Returns the
    /// message as written.
    pub fn put<M: HandshakeMessage>(&self, mut message: M) -> Result<M> {
        let now = self.clock.now_secs();
        message.prepare();
        message.stamp(now, now + self.config.ttl_for(M::KIND));

        let bytes = serde_json::to_vec(&message)?;
        self.store.set(M::KIND.key(), &bytes)?;

        debug!(
            kind = %M::KIND,
            issued_at = now,
            expires_at = message.expires_at(),
            "Wrote handshake message"
        );
        Ok(message)
    }

    /// Read a message without consuming it.
    ///
    /// Absent, malformed, disallowed, and expired entries all read as
    /// `None`, as does an unavailable store. Anything discarded is also
    /// deleted so it is not re-observed.
    pub fn get<M: HandshakeMessage>(&self) -> Option<M> {
        let key = M::KIND.key();
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(kind = %M::KIND, error = %e, "Store unavailable, treating as absent");
                return None;
            }
        };

        match self.decode::<M>(&bytes) {
            Ok(message) => Some(message),
            Err(discard) => {
                self.report(M::KIND, &discard);
                self.remove_quietly(key);
                None
            }
        }
    }

    /// Read and remove a message in one claim.
    ///
    /// Uses the backend's atomic claim where available, so at most one
    /// reader observes a given entry.
    pub fn take<M: HandshakeMessage>(&self) -> Option<M> {
        let bytes = match self.store.take(M::KIND.key()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(kind = %M::KIND, error = %e, "Store unavailable, treating as absent");
                return None;
            }
        };

        match self.decode::<M>(&bytes) {
            Ok(message) => {
                debug!(kind = %M::KIND, "Consumed handshake message");
                Some(message)
            }
            Err(discard) => {
                self.report(M::KIND, &discard);
                None
            }
        }
    }

    /// Remove a message. Absent keys are not an error.
    pub fn clear<M: HandshakeMessage>(&self) -> Result<()> {
        self.clear_kind(M::KIND)
    }

    pub fn clear_kind(&self, kind: MessageKind) -> Result<()> {
        self.store.remove(kind.key())?;
        debug!(kind = %kind, "Cleared handshake message");
        Ok(())
    }

    /// Whether a raw entry exists for the kind, valid or not.
    pub fn is_present(&self, kind: MessageKind) -> bool {
        matches!(self.store.get(kind.key()), Ok(Some(_)))
    }

    /// Sweep every kind, deleting entries that would read as absent.
    ///
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let mut removed = 0;
        removed += self.sweep::<super::AuthRequest>();
        removed += self.sweep::<super::AuthSession>();
        removed += self.sweep::<super::AuthDenied>();
        removed += self.sweep::<super::PostSignRequest>();
        removed += self.sweep::<super::PostSignResponse>();
        removed
    }

    fn sweep<M: HandshakeMessage>(&self) -> usize {
        if self.is_present(M::KIND) && self.get::<M>().is_none() {
            1
        } else {
            0
        }
    }

    fn decode<M: HandshakeMessage>(&self, bytes: &[u8]) -> std::result::Result<M, Discard> {
        let message: M =
            serde_json::from_slice(bytes).map_err(|e| Discard::Malformed(e.to_string()))?;

        // The writer controls expiresAt, so never honour more than the
        // configured TTL from issuedAt.
        let expires_at = message.expires_at().min(
            message
                .issued_at()
                .saturating_add(self.config.ttl_for(M::KIND)),
        );
        let now = self.clock.now_secs();
        if now > expires_at {
            return Err(Discard::Expired { expires_at, now });
        }

        let ctx = ValidationContext {
            policy: &self.config.callback_policy,
            bundle_id: &self.config.bundle_id,
        };
        message
            .validate(&ctx)
            .map_err(|e| Discard::Rejected(e.to_string()))?;

        Ok(message)
    }

    fn report(&self, kind: MessageKind, discard: &Discard) {
        match discard {
            Discard::Malformed(reason) => {
                warn!(kind = %kind, reason = %reason, "Discarding malformed handshake message")
            }
            Discard::Rejected(reason) => {
                warn!(kind = %kind, reason = %reason, "Discarding invalid handshake message")
            }
            Discard::Expired { expires_at, now } => {
                debug!(kind = %kind, expires_at, now, "Discarding expired handshake message")
            }
        }
    }

    fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "Failed to remove discarded entry");
        }
    }
}

impl std::fmt::Debug for HandshakeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeStore")
            .field("config", &self.config)
            .finish()
    }
}
