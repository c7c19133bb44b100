//! Cancellable one-shot timers.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// A single pending deadline that can be armed, re-armed and cancelled.
///
/// At most one deadline is pending at a time. Await [`fired`](Self::fired)
/// inside a `select!` to act on it; when nothing is armed `fired` never
/// resolves, so the branch stays quiet.
#[derive(Debug, Default)]
pub struct ScheduledTask {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any pending deadline.
    pub fn schedule(&mut self, delay: Duration) {
        self.deadline = Some(Box::pin(sleep(delay)));
    }

    /// Arm the timer unless one is already pending.
    ///
    /// Returns `true` if a new deadline was armed.
    pub fn schedule_if_idle(&mut self, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.schedule(delay);
        true
    }

    /// Cancel the pending deadline. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending deadline elapses, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.as_ref().map(|sleep| sleep.deadline())
    }

    /// Resolves when the armed deadline elapses, then disarms.
    ///
    /// Cancel-safe: dropping the future leaves the deadline armed.
    pub async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.await;
                self.deadline = None;
            }
            None => future::pending().await,
        }
    }
}
