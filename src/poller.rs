//! Poll scheduling
//!
//! The shared store has no change notification, so both sides re-read it on
//! a fixed interval. [`PollLoop`] owns that interval and ties it to the host
//! lifecycle: ticks stop while backgrounded and resume, with an immediate
//! tick, when foregrounded again. Protocol logic only assumes it is called
//! periodically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default poll interval while foregrounded
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Work run on every poll tick
#[async_trait::async_trait]
pub trait PollTask: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Re-read the store and advance whatever state the task owns
    async fn tick(&self);
}

/// Host lifecycle as seen by the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Foreground,
    Background,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Interval-driven runner for a [`PollTask`]
pub struct PollLoop {
    task: Arc<dyn PollTask>,
    config: PollConfig,
    lifecycle: watch::Sender<Lifecycle>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollLoop {
    pub fn new(task: Arc<dyn PollTask>, config: PollConfig) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Stopped);
        Self {
            task,
            config,
            lifecycle,
            handle: Mutex::new(None),
        }
    }

    /// Start ticking in the foreground. No-op if already running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Poll loop {} already running", self.task.name());
            return;
        }

        self.lifecycle.send_replace(Lifecycle::Foreground);
        let receiver = self.lifecycle.subscribe();
        let task = Arc::clone(&self.task);
        let period = self.config.interval;

        info!(
            "Starting poll loop {} (interval: {:?})",
            task.name(),
            period
        );
        *handle = Some(tokio::spawn(run(task, period, receiver)));
    }

    /// Stop ticking and wait for the loop to exit.
    pub async fn stop(&self) {
        self.lifecycle.send_replace(Lifecycle::Stopped);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Poll loop {} ended abnormally: {}", self.task.name(), e);
            }
        }
        info!("Stopped poll loop {}", self.task.name());
    }

    /// Follow a foreground/background transition of the host.
    ///
    /// Ignored while the loop is stopped.
    pub fn set_foreground(&self, foreground: bool) {
        let next = if foreground {
            Lifecycle::Foreground
        } else {
            Lifecycle::Background
        };
        let changed = self.lifecycle.send_if_modified(|current| {
            if *current == Lifecycle::Stopped || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(task = self.task.name(), lifecycle = ?next, "Poll lifecycle changed");
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

async fn run(
    task: Arc<dyn PollTask>,
    period: Duration,
    mut lifecycle: watch::Receiver<Lifecycle>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let state = *lifecycle.borrow_and_update();
        match state {
            Lifecycle::Stopped => break,
            Lifecycle::Background => {
                if lifecycle.changed().await.is_err() {
                    break;
                }
                // Resume with an immediate tick
                interval.reset_immediately();
            }
            Lifecycle::Foreground => {
                tokio::select! {
                    _ = interval.tick() => task.tick().await,
                    changed = lifecycle.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("Poll loop {} exited", task.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTask {
        ticks: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PollTask for CountingTask {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ticks(task: &CountingTask) -> usize {
        task.ticks.load(Ordering::SeqCst)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let task = Arc::new(CountingTask::default());
        let poll = PollLoop::new(task.clone(), PollConfig::default());

        poll.start().await;
        settle().await;
        assert_eq!(ticks(&task), 1, "first tick is immediate");

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(ticks(&task), 4);

        poll.stop().await;
        assert!(!poll.is_running().await);
        assert_eq!(poll.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_pauses_and_foreground_resumes() {
        let task = Arc::new(CountingTask::default());
        let poll = PollLoop::new(task.clone(), PollConfig::default());
        poll.start().await;
        settle().await;

        poll.set_foreground(false);
        settle().await;
        let paused_at = ticks(&task);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks(&task), paused_at);

        poll.set_foreground(true);
        settle().await;
        assert_eq!(ticks(&task), paused_at + 1, "resume ticks immediately");

        poll.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_foreground_ignored_when_stopped() {
        let task = Arc::new(CountingTask::default());
        let poll = PollLoop::new(task.clone(), PollConfig::default());

        poll.set_foreground(true);
        assert_eq!(poll.lifecycle(), Lifecycle::Stopped);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks(&task), 0);
    }
}
