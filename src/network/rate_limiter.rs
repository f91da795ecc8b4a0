//! Per-peer frame rate limiting.
//!
//! Each session owns one limiter. Frames over their budget are read off the
//! socket and dropped so the stream stays in sync.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    limits: HashMap<&'static str, (Duration, u32)>,
    windows: HashMap<&'static str, (Instant, u32)>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limits([
            ("inv", (Duration::from_secs(1), 200)),
            ("getdata", (Duration::from_secs(1), 200)),
            ("data", (Duration::from_secs(1), 50)),
        ])
    }

    pub fn with_limits(limits: impl IntoIterator<Item = (&'static str, (Duration, u32))>) -> Self {
        Self {
            limits: limits.into_iter().collect(),
            windows: HashMap::new(),
        }
    }

    /// Counts one frame of `kind`; false when the current window is exhausted.
    pub fn check(&mut self, kind: &'static str) -> bool {
        let (window, max) = self
            .limits
            .get(kind)
            .copied()
            .unwrap_or((Duration::from_secs(1), 100));

        let now = Instant::now();
        let (started, count) = self.windows.entry(kind).or_insert((now, 0));

        if now.duration_since(*started) > window {
            *started = now;
            *count = 0;
        }

        if *count >= max {
            false
        } else {
            *count += 1;
            true
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
