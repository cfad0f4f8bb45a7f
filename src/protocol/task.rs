//! Poll-loop adapters for the protocol state machines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::poller::PollTask;

use super::holder::{HolderEvent, HolderProtocol};
use super::post_sign::PostSignHolder;
use crate::handshake::PostSignRequest;

/// Events surfaced to the holder's user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderNotice {
    Auth(HolderEvent),
    PostSign(PostSignRequest),
}

/// Drives a [`HolderProtocol`] (and optionally a [`PostSignHolder`]) from a
/// poll loop, forwarding anything the user should see.
///
/// Decisions are taken outside the loop by locking the protocol; the next
/// tick re-reads the store, so an abandoned decision is harmless.
pub struct HolderTask {
    auth: Arc<Mutex<HolderProtocol>>,
    post_sign: Option<Arc<Mutex<PostSignHolder>>>,
    notices: mpsc::UnboundedSender<HolderNotice>,
    /// Set while the user has already been told the identity is locked
    unlock_notified: AtomicBool,
}

impl HolderTask {
    pub fn new(
        auth: Arc<Mutex<HolderProtocol>>,
        notices: mpsc::UnboundedSender<HolderNotice>,
    ) -> Self {
        Self {
            auth,
            post_sign: None,
            notices,
            unlock_notified: AtomicBool::new(false),
        }
    }

    pub fn with_post_sign(mut self, post_sign: Arc<Mutex<PostSignHolder>>) -> Self {
        self.post_sign = Some(post_sign);
        self
    }

    fn notify(&self, notice: HolderNotice) {
        if self.notices.send(notice).is_err() {
            debug!("Holder notice receiver dropped");
        }
    }
}

#[async_trait::async_trait]
impl PollTask for HolderTask {
    fn name(&self) -> &str {
        "holder"
    }

    async fn tick(&self) {
        let event = self.auth.lock().await.poll();
        let locked = event == HolderEvent::AwaitingUnlock;
        let was_locked = self.unlock_notified.swap(locked, Ordering::Relaxed);
        match event {
            HolderEvent::Idle | HolderEvent::AwaitingDecision => {}
            HolderEvent::AwaitingUnlock if was_locked => {}
            other => self.notify(HolderNotice::Auth(other)),
        }

        if let Some(post_sign) = &self.post_sign {
            if let Some(request) = post_sign.lock().await.next_request() {
                self.notify(HolderNotice::PostSign(request));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::handshake::{AuthRequest, HandshakeConfig, HandshakeStore, PostSignRequest};
    use crate::protocol::post_sign::PostSignHolder;
    use crate::signing::SigningService;
    use crate::store::MemoryStore;
    use crate::vault::LocalKeyVault;

    fn store() -> HandshakeStore {
        HandshakeStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
            HandshakeConfig::default(),
        )
    }

    fn holder_on(store: &HandshakeStore, vault: LocalKeyVault) -> Arc<Mutex<HolderProtocol>> {
        let signer = SigningService::new(Arc::new(vault));
        Arc::new(Mutex::new(HolderProtocol::new(store.clone(), signer)))
    }

    fn lasko_request() -> AuthRequest {
        AuthRequest::new("LASKO", "com.lasko.app", ["read"], "lasko://auth/callback")
    }

    #[tokio::test]
    async fn test_tick_forwards_new_requests_once() {
        let store = store();
        let holder = holder_on(&store, LocalKeyVault::generate());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = HolderTask::new(holder, tx);

        store.put(lasko_request()).unwrap();

        task.tick().await;
        task.tick().await;

        assert!(matches!(
            rx.try_recv(),
            Ok(HolderNotice::Auth(HolderEvent::DecisionRequired(_)))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tick_forwards_post_sign_request_once() {
        let store = store();
        let vault = LocalKeyVault::generate();
        let post_sign = PostSignHolder::new(
            store.clone(),
            SigningService::new(Arc::new(LocalKeyVault::generate())),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = HolderTask::new(holder_on(&store, vault), tx)
            .with_post_sign(Arc::new(Mutex::new(post_sign)));

        store.put(PostSignRequest::new("abcd", 1_000)).unwrap();

        task.tick().await;
        task.tick().await;

        assert!(matches!(rx.try_recv(), Ok(HolderNotice::PostSign(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_locked_identity_is_reported_once() {
        let store = store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = HolderTask::new(holder_on(&store, LocalKeyVault::empty()), tx);

        store.put(lasko_request()).unwrap();

        for _ in 0..3 {
            task.tick().await;
        }

        assert_eq!(
            rx.try_recv().unwrap(),
            HolderNotice::Auth(HolderEvent::AwaitingUnlock)
        );
        assert!(rx.try_recv().is_err());
    }
}
