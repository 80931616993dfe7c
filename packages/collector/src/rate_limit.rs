use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Per-client fixed-window admission counter.
///
/// A client is allowed up to `limit` actions per window; the count resets the
/// first time the client is seen after its window has elapsed. Coarse at
/// window boundaries in exchange for O(1) state per client.
pub struct RateLimiter {
    /// client key -> current window
    entries: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

struct Window {
    count: u32,
    started_at: Instant,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    /// Admission check. Never errors; the caller decides the rejection.
    pub fn allow(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(client_key.to_string())
            .or_insert(Window {
                count: 0,
                started_at: now,
            });
        let window = entry.value_mut();

        if now.duration_since(window.started_at) >= self.window {
            window.count = 1;
            window.started_at = now;
            return true;
        }

        if window.count >= self.limit {
            return false;
        }

        window.count += 1;
        true
    }

    /// Remove clients whose window has aged out. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, window| now.duration_since(window.started_at) < self.window);
        before.saturating_sub(self.entries.len())
    }

    /// Number of distinct clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.entries.len()
    }
}
