//! Hourly attempt limiter.
//!
//! Fixed window anchored to the first attempt after the previous window
//! closed. Attempts are counted, not successes, so failed and unreachable
//! sends still consume a slot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::clock::Clock;

/// One hour.
pub const HOUR: Duration = Duration::from_secs(3600);

/// Snapshot of the limiter's accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub window_start: Option<DateTime<Utc>>,
    pub count: u32,
    pub limit: u32,
    pub window: Duration,
}

/// Caps attempts per window, suspending the caller when the cap is hit.
pub struct HourlyRateLimiter {
    limit: u32,
    window: Duration,
    window_start: Option<DateTime<Utc>>,
    count: u32,
    clock: Arc<dyn Clock>,
}

impl HourlyRateLimiter {
    pub fn new(limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(limit, HOUR, clock)
    }

    pub fn with_window(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            window_start: None,
            count: 0,
            clock,
        }
    }

    pub fn window(&self) -> RateWindow {
        RateWindow {
            window_start: self.window_start,
            count: self.count,
            limit: self.limit,
            window: self.window,
        }
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.window_start {
            None => true,
            Some(start) => (now - start).to_std().map_or(false, |elapsed| elapsed >= self.window),
        }
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        debug!(start = %now, "Opening new rate window");
        self.window_start = Some(now);
        self.count = 0;
    }

    /// Wait until a slot is free in the current window.
    pub async fn before_send(&mut self) {
        let now = self.clock.now();
        if self.expired(now) {
            self.reset(now);
        }
        if self.count < self.limit {
            return;
        }

        let wait = self
            .window_start
            .and_then(|start| (start + chrono::Duration::from_std(self.window).ok()? - now).to_std().ok())
            .unwrap_or_default();
        info!(
            limit = self.limit,
            minutes = wait.as_secs().div_ceil(60),
            "Hourly limit reached; waiting for a new window"
        );
        self.clock.sleep(wait).await;
        let now = self.clock.now();
        self.reset(now);
    }

    /// Count one attempt against the current window.
    pub fn mark_attempt(&mut self) {
        let now = self.clock.now();
        if self.expired(now) {
            self.reset(now);
        }
        self.count += 1;
    }
}
