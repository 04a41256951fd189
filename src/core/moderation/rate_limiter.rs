// Fixed-window rate limiter keyed by string.
//
// Used to cap how often one backend error code may escalate to the review
// queue. Shared by every check invocation, so it lives behind a DashMap and
// all updates go through the entry API.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// One escalation per error code per this window.
pub const BACKEND_ERROR_WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

pub struct KeyedRateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl KeyedRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            windows: DashMap::new(),
        }
    }

    /// The limiter used for backend errors: 1 per code per 10 minutes.
    pub fn for_backend_errors() -> Self {
        Self::new(1, BACKEND_ERROR_WINDOW)
    }

    /// Record one action under `key`. Returns false when the window is full.
    pub fn try_perform(&self, key: &str) -> bool {
        self.try_perform_at(key, Instant::now())
    }

    pub(crate) fn try_perform_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.max_per_window {
            return false;
        }

        entry.count += 1;
        true
    }

    /// Drop windows that have fully elapsed.
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started_at) < self.window);
    }
}
