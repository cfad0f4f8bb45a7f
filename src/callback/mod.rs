//! Callback Delivery
//!
//! Hands control back to the requesting application by opening its
//! callback URL with a `status` query parameter. OS URL dispatch can fail
//! transiently, so the same URL is retried on a short backoff before the
//! caller is told to offer a manual return.

use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::types::{HandshakeError, Result};

/// Default retry delays after the first failed open
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 3] = [150, 400, 800];

/// OS-level URL launcher
#[async_trait::async_trait]
pub trait UrlLauncher: Send + Sync {
    /// Try to open `url`, reporting whether the OS accepted it.
    async fn open(&self, url: &str) -> bool;
}

/// Launches URLs through the platform opener command.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandLauncher {
    fn default() -> Self {
        let program = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        };
        Self::new(program)
    }
}

#[async_trait::async_trait]
impl UrlLauncher for CommandLauncher {
    async fn open(&self, url: &str) -> bool {
        match tokio::process::Command::new(&self.program)
            .arg(url)
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("Failed to run {}: {}", self.program, e);
                false
            }
        }
    }
}

/// Outcome reported to the requesting application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Approved,
    Declined,
}

impl CallbackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Declined => "declined",
        }
    }
}

/// `callback_url` with `status=<approved|declined>` appended.
pub fn callback_url_with_status(callback_url: &str, status: CallbackStatus) -> Result<String> {
    let mut url = Url::parse(callback_url)
        .map_err(|e| HandshakeError::Validation(format!("Invalid callback URL: {e}")))?;
    url.query_pairs_mut().append_pair("status", status.as_str());
    Ok(url.into())
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Delay before each retry; its length is the retry count
    pub retry_delays: Vec<Duration>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

/// Result of a delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The OS accepted the URL
    Delivered { url: String, attempts: usize },
    /// Every attempt failed; the user needs a manual "Return" affordance
    ManualReturn { url: String, attempts: usize },
}

impl DeliveryOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Delivered { url, .. } | Self::ManualReturn { url, .. } => url,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            Self::Delivered { attempts, .. } | Self::ManualReturn { attempts, .. } => *attempts,
        }
    }

    pub fn needs_manual_return(&self) -> bool {
        matches!(self, Self::ManualReturn { .. })
    }

    /// Treat a manual-return outcome as a delivery error.
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Delivered { url, .. } => Ok(url),
            Self::ManualReturn { url, attempts } => Err(HandshakeError::Delivery(format!(
                "Could not open {url} after {attempts} attempts"
            ))),
        }
    }
}

/// Retrying callback delivery
pub struct CallbackDelivery<L> {
    launcher: L,
    config: DeliveryConfig,
}

impl<L: UrlLauncher> CallbackDelivery<L> {
    pub fn new(launcher: L, config: DeliveryConfig) -> Self {
        Self { launcher, config }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Open the callback with a status, retrying on failure.
    pub async fn deliver(&self, callback_url: &str, status: CallbackStatus) -> Result<DeliveryOutcome> {
        let url = callback_url_with_status(callback_url, status)?;

        let mut attempts = 1;
        if self.launcher.open(&url).await {
            info!(status = status.as_str(), attempts, "Callback delivered");
            return Ok(DeliveryOutcome::Delivered { url, attempts });
        }

        for delay in &self.config.retry_delays {
            tokio::time::sleep(*delay).await;
            attempts += 1;
            debug!(attempts, "Retrying callback open");
            if self.launcher.open(&url).await {
                info!(status = status.as_str(), attempts, "Callback delivered");
                return Ok(DeliveryOutcome::Delivered { url, attempts });
            }
        }

        warn!(attempts, "Callback delivery failed, manual return required");
        Ok(DeliveryOutcome::ManualReturn { url, attempts })
    }

    /// Single open triggered by the user's manual "Return" action.
    pub async fn manual_return(&self, url: &str) -> Result<()> {
        if self.launcher.open(url).await {
            Ok(())
        } else {
            Err(HandshakeError::Delivery(format!("Could not open {url}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` opens, then succeeds.
    struct FlakyLauncher {
        failures: usize,
        calls: AtomicUsize,
        opened: Mutex<Vec<String>>,
    }

    impl FlakyLauncher {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl UrlLauncher for FlakyLauncher {
        async fn open(&self, url: &str) -> bool {
            self.opened.lock().unwrap().push(url.to_string());
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.failures
        }
    }

    #[test]
    fn test_status_query() {
        assert_eq!(
            callback_url_with_status("lasko://auth/callback", CallbackStatus::Approved).unwrap(),
            "lasko://auth/callback?status=approved"
        );
        assert_eq!(
            callback_url_with_status("lasko://auth/callback", CallbackStatus::Declined).unwrap(),
            "lasko://auth/callback?status=declined"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_succeeds() {
        let delivery = CallbackDelivery::new(FlakyLauncher::new(0), DeliveryConfig::default());
        let outcome = delivery
            .deliver("lasko://auth/callback", CallbackStatus::Approved)
            .await
            .unwrap();
        assert_eq!(outcome.attempts(), 1);
        assert!(!outcome.needs_manual_return());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_same_url_with_backoff() {
        let delivery = CallbackDelivery::new(FlakyLauncher::new(2), DeliveryConfig::default());
        let started = tokio::time::Instant::now();

        let outcome = delivery
            .deliver("lasko://auth/callback", CallbackStatus::Declined)
            .await
            .unwrap();

        assert_eq!(outcome.attempts(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550) && elapsed < Duration::from_millis(600));
        let opened = delivery.launcher().opened.lock().unwrap().clone();
        assert!(opened.iter().all(|u| u == "lasko://auth/callback?status=declined"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fall_back_to_manual_return() {
        let delivery = CallbackDelivery::new(FlakyLauncher::new(usize::MAX), DeliveryConfig::default());
        let started = tokio::time::Instant::now();

        let outcome = delivery
            .deliver("lasko://auth/callback", CallbackStatus::Approved)
            .await
            .unwrap();

        assert!(outcome.needs_manual_return());
        assert_eq!(outcome.attempts(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_350) && elapsed < Duration::from_millis(1_400));
        assert!(matches!(outcome.into_result(), Err(HandshakeError::Delivery(_))));
    }

    #[tokio::test]
    async fn test_invalid_callback_url() {
        let delivery = CallbackDelivery::new(FlakyLauncher::new(0), DeliveryConfig::default());
        assert!(delivery
            .deliver("not a url", CallbackStatus::Approved)
            .await
            .is_err());
    }
}
