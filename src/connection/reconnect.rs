//! Fixed-delay, bounded reconnect supervision

use parking_lot::Mutex;
use robot_link_shared::{LinkError, ReconnectPhase, ReconnectTracker, RetryDecision};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;

/// How a supervision run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected { attempts: u32 },
    GivenUp { attempts: u32 },
    Cancelled,
}

/// Retries a lost session a bounded number of times after a fixed delay.
///
/// At most one run is active; arming a run cancels the previous one.
pub struct ReconnectPolicy {
    delay: Duration,
    tracker: Mutex<ReconnectTracker>,
    cancel: Mutex<CancellationToken>,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            tracker: Mutex::new(ReconnectTracker::new(max_attempts)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.delay, config.max_attempts)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.tracker.lock().max_attempts()
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.tracker.lock().phase()
    }

    pub fn attempts(&self) -> u32 {
        self.tracker.lock().attempts()
    }

    /// Stop any scheduled or running attempt and return to idle
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
        self.tracker.lock().cancel();
    }

    /// Start a new supervision run, cancelling any previous one.
    ///
    /// The returned token is cancelled by [`cancel`](Self::cancel).
    pub fn arm(&self) -> CancellationToken {
        let token = {
            let mut current = self.cancel.lock();
            current.cancel();
            *current = CancellationToken::new();
            current.clone()
        };
        let mut tracker = self.tracker.lock();
        tracker.cancel();
        tracker.schedule();
        token
    }

    /// Run attempts for an armed run until one succeeds, the limit is
    /// reached or `token` is cancelled.
    ///
    /// `attempt` receives the 1-based attempt number.
    pub async fn run<F, Fut>(&self, token: CancellationToken, mut attempt: F) -> ReconnectOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), LinkError>>,
    {
        loop {
            debug!("[RECONNECT] Next attempt in {:?}", self.delay);
            tokio::select! {
                biased;
                _ = token.cancelled() => return Self::cancelled(),
                _ = tokio::time::sleep(self.delay) => {}
            }

            let number = self.tracker.lock().begin_attempt();
            info!("[RECONNECT] Attempt {}/{}", number, self.max_attempts());

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Self::cancelled(),
                result = attempt(number) => result,
            };

            match result {
                Ok(()) => {
                    self.tracker.lock().succeed();
                    info!("[RECONNECT] Recovered after {} attempt(s)", number);
                    return ReconnectOutcome::Reconnected { attempts: number };
                }
                Err(e) => {
                    warn!("[RECONNECT] Attempt {} failed: {}", number, e);
                    if self.tracker.lock().fail() == RetryDecision::GiveUp {
                        warn!("[RECONNECT] Giving up after {} attempts", number);
                        return ReconnectOutcome::GivenUp { attempts: number };
                    }
                }
            }
        }
    }

    fn cancelled() -> ReconnectOutcome {
        debug!("[RECONNECT] Cancelled");
        ReconnectOutcome::Cancelled
    }
}
