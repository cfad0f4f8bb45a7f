//! Post-sign handshake.
//!
//! A narrower request/response pair: the requester asks for a signature
//! over a content hash, the holder answers with a Base64 signature over
//! `LASKO_POST|<hash>|<timestampMs>|<address>|<bundleId>|v1`.

use tracing::{debug, info, warn};

use crate::handshake::{HandshakeStore, PostSignRequest, PostSignResponse};
use crate::signing::{canonical, SignatureEncoding, SigningService};
use crate::types::Result;

/// (hash, timestamp) identifying one post-sign request
type RequestId = (String, u64);

fn request_id(request: &PostSignRequest) -> RequestId {
    (request.content_hash_hex.clone(), request.timestamp)
}

/// Holder side: answers post-sign requests.
pub struct PostSignHolder {
    store: HandshakeStore,
    signer: SigningService,
    /// Last request handed out by `next_request`
    presented: Option<RequestId>,
    /// Last request answered
    answered: Option<RequestId>,
}

impl PostSignHolder {
    pub fn new(store: HandshakeStore, signer: SigningService) -> Self {
        Self {
            store,
            signer,
            presented: None,
            answered: None,
        }
    }

    /// A request not yet handed out, if any. Each request is returned once.
    pub fn next_request(&mut self) -> Option<PostSignRequest> {
        let Some(request) = self.store.get::<PostSignRequest>() else {
            self.presented = None;
            return None;
        };
        if self.is_answered(&request) {
            debug!("Answered post-sign request still present, clearing again");
            self.clear_request();
            return None;
        }
        let id = request_id(&request);
        if self.presented.as_ref() == Some(&id) {
            return None;
        }
        self.presented = Some(id);
        Some(request)
    }

    /// Sign the request and write the response.
    ///
    /// Returns `None` without signing when the request was already answered
    /// or is no longer in the store.
    pub async fn sign_request(
        &mut self,
        request: &PostSignRequest,
    ) -> Result<Option<PostSignResponse>> {
        if !self.is_live(request) {
            debug!(hash = %request.content_hash_hex, "Post-sign request no longer pending");
            return Ok(None);
        }

        let address = self.signer.identity_address()?;
        let message = canonical::post_sign_message(
            &request.content_hash_hex,
            request.timestamp,
            &address,
            &self.store.config().bundle_id,
        )?;
        let signed = self
            .signer
            .sign_in_background(message, SignatureEncoding::Base64)
            .await?;

        // Signing yields to the runtime; re-check before answering.
        if !self.is_live(request) {
            debug!(hash = %request.content_hash_hex, "Post-sign request withdrawn while signing");
            return Ok(None);
        }

        let response = self.store.put(PostSignResponse {
            signature_base64: signed.signature,
            pubkey_compressed_hex: signed.pubkey_compressed_hex,
            timestamp: request.timestamp,
            content_hash_hex: request.content_hash_hex.clone(),
            address,
            issued_at: 0,
            expires_at: 0,
        })?;
        self.mark_answered(request);

        info!(hash = %request.content_hash_hex, "Post-sign request signed");
        Ok(Some(response))
    }

    /// Drop the request without signing. Returns false if it was no
    /// longer pending.
    pub fn decline_request(&mut self, request: &PostSignRequest) -> bool {
        if !self.is_live(request) {
            debug!(hash = %request.content_hash_hex, "Post-sign request no longer pending");
            return false;
        }
        self.mark_answered(request);
        info!(hash = %request.content_hash_hex, "Post-sign request declined");
        true
    }

    /// Unanswered and still the request in the store.
    fn is_live(&self, request: &PostSignRequest) -> bool {
        !self.is_answered(request)
            && self
                .store
                .get::<PostSignRequest>()
                .is_some_and(|current| request_id(&current) == request_id(request))
    }

    fn is_answered(&self, request: &PostSignRequest) -> bool {
        self.answered.as_ref() == Some(&request_id(request))
    }

    fn mark_answered(&mut self, request: &PostSignRequest) {
        self.answered = Some(request_id(request));
        self.clear_request();
    }

    fn clear_request(&self) {
        if let Err(e) = self.store.clear::<PostSignRequest>() {
            warn!(error = %e, "Failed to clear post-sign request");
        }
    }
}

/// What a post-sign requester poll observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostSignEvent {
    Idle,
    Waiting,
    Signed(PostSignResponse),
    TimedOut,
}

/// Requester side: asks for a content hash to be signed.
pub struct PostSignRequester {
    store: HandshakeStore,
    pending: Option<PostSignRequest>,
}

impl PostSignRequester {
    pub fn new(store: HandshakeStore) -> Self {
        Self {
            store,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PostSignRequest> {
        self.pending.as_ref()
    }

    /// Request a signature over `content_hash_hex`, timestamped now.
    pub fn submit(&mut self, content_hash_hex: &str) -> Result<PostSignRequest> {
        if self.store.take::<PostSignResponse>().is_some() {
            debug!("Discarded stale post-sign response");
        }
        let timestamp = self.store.clock().now_millis();
        let written = self
            .store
            .put(PostSignRequest::new(content_hash_hex, timestamp))?;
        self.pending = Some(written.clone());
        Ok(written)
    }

    /// Re-read the store. Responses are verified against the canonical
    /// message by the handshake store before they get here.
    pub fn poll(&mut self) -> PostSignEvent {
        let Some(pending) = self.pending.clone() else {
            return PostSignEvent::Idle;
        };

        if let Some(response) = self.store.take::<PostSignResponse>() {
            if response.answers(&pending) {
                self.pending = None;
                return PostSignEvent::Signed(response);
            }
            debug!("Discarded post-sign response for a different request");
        }

        if self.store.clock().now_secs() > pending.expires_at {
            if let Err(e) = self.store.clear::<PostSignRequest>() {
                debug!(error = %e, "Failed to clear expired post-sign request");
            }
            self.pending = None;
            return PostSignEvent::TimedOut;
        }

        PostSignEvent::Waiting
    }
}
