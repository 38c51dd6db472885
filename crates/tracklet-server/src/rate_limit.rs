//! Fixed-window request limiter for the ingest endpoint.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Window {
    started: Instant,
    count: u32,
}

/// Per-key fixed window counter. Keys are `{website_id}:{ip}` so one noisy
/// client cannot starve a site, and one site cannot starve another.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Whether this request may proceed. The first request for a key opens
    /// its window; request N+1 within the window is rejected.
    pub async fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop elapsed windows. Called periodically so idle keys do not
    /// accumulate forever.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_after_limit_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.allow("site:1.2.3.4").await);
        }
        assert!(!limiter.allow("site:1.2.3.4").await);
        // A different key has its own window.
        assert!(limiter.allow("site:5.6.7.8").await);
    }

    #[tokio::test]
    async fn window_resets_after_elapse() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(limiter.allow("k").await);
    }

    #[tokio::test]
    async fn sweep_evicts_elapsed_windows() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        limiter.allow("k").await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        limiter.sweep().await;
        assert_eq!(limiter.tracked_keys().await, 0);
    }
}
