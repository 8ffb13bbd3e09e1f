//! Trailing-edge coalescing for view updates.
//!
//! The first request in a quiet period fires immediately. Requests that
//! arrive within `interval` of the last fire are merged into one deadline at
//! `last_fire + interval`, so the last change of a burst is never lost and a
//! view is patched at most once per interval.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Apply now.
    FireNow,
    /// Apply when the returned deadline is reached.
    Deferred(Instant),
}

#[derive(Debug, Clone)]
pub struct TrailingThrottle {
    interval: Duration,
    last_fired: Option<Instant>,
    deadline: Option<Instant>,
}

impl TrailingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register a change at `now`.
    pub fn request(&mut self, now: Instant) -> ThrottleDecision {
        if let Some(deadline) = self.deadline {
            return ThrottleDecision::Deferred(deadline);
        }
        match self.last_fired {
            Some(last) if now < last + self.interval => {
                let deadline = last + self.interval;
                self.deadline = Some(deadline);
                ThrottleDecision::Deferred(deadline)
            }
            _ => {
                self.last_fired = Some(now);
                ThrottleDecision::FireNow
            }
        }
    }

    /// Consume the pending deadline if it has passed.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.last_fired = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Pending trailing deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
