//! Rearmable inactivity timer.

use std::{pin::Pin, time::Duration};

use tokio::time::{Sleep, sleep};

/// Single countdown that signals suspected connection loss.
///
/// The pending deadline is an owned [`Sleep`], so dropping the watchdog (or
/// the session owning it) cancels it.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Watchdog {
    /// Create a disarmed watchdog. `None` disables it permanently.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Configured interval.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cancel any pending deadline and, unless disabled, start a new one.
    pub fn reset(&mut self) {
        self.cancel();
        if let Some(timeout) = self.timeout {
            self.deadline = Some(Box::pin(sleep(timeout)));
        }
    }

    /// Disarm unconditionally.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` while a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the armed deadline passes, then disarms.
    ///
    /// Pending forever while disarmed. Cancel-safe: dropping the future keeps
    /// the deadline armed.
    pub async fn expired(&mut self) -> Duration {
        let (Some(timeout), Some(deadline)) = (self.timeout, self.deadline.as_mut()) else {
            return std::future::pending().await;
        };
        deadline.as_mut().await;
        self.deadline = None;
        timeout
    }
}
