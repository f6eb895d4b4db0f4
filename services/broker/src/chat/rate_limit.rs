//! Outbound chat rate limiting.
//!
//! The upstream allows 20 messages per 30 s per channel. The limiter is a
//! fixed-window token counter; the session's outbound task consumes one
//! token per message and sleeps until the window rolls when none remain,
//! draining its queue in order.

use std::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(30);
pub const MESSAGES_PER_WINDOW: u32 = 20;

#[derive(Debug)]
pub struct RateLimit {
    cap: u32,
    window: Duration,
    used: u32,
    window_start: Instant,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit::new(MESSAGES_PER_WINDOW, WINDOW)
    }
}

impl RateLimit {
    pub fn new(cap: u32, window: Duration) -> Self {
        RateLimit {
            cap,
            window,
            used: 0,
            window_start: Instant::now(),
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.used = 0;
        }
    }

    /// Take one send slot if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.used < self.cap {
            self.used += 1;
            true
        } else {
            false
        }
    }

    /// How long until the current window rolls and slots free up.
    pub fn until_reset(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.duration_since(self.window_start))
    }
}
