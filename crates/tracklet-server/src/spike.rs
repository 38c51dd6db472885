//! Traffic spike detection over session starts.
//!
//! Each website keeps a sliding window of session start timestamps. When a
//! new start pushes the count past the site's threshold and the cooldown
//! has elapsed, the caller is told to notify.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

struct SiteWindow {
    starts: VecDeque<DateTime<Utc>>,
    last_notified: Option<DateTime<Utc>>,
}

pub struct SpikeDetector {
    sites: Mutex<HashMap<String, SiteWindow>>,
    cooldown: Duration,
}

impl SpikeDetector {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            sites: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Record one session start. Returns true when the site just crossed
    /// its threshold and is outside the notification cooldown.
    pub async fn record_start(
        &self,
        website_id: &str,
        threshold: i64,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let mut sites = self.sites.lock().await;
        let site = sites.entry(website_id.to_string()).or_insert(SiteWindow {
            starts: VecDeque::new(),
            last_notified: None,
        });

        let cutoff = now - chrono::Duration::seconds(window_secs.max(1));
        while site.starts.front().is_some_and(|t| *t <= cutoff) {
            site.starts.pop_front();
        }
        site.starts.push_back(now);

        if (site.starts.len() as i64) <= threshold {
            return false;
        }
        let cooldown = chrono::Duration::from_std(self.cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        if site
            .last_notified
            .is_some_and(|last| now - last < cooldown)
        {
            return false;
        }
        site.last_notified = Some(now);
        true
    }

    /// Drop state for sites with no recent starts.
    pub async fn sweep(&self, now: DateTime<Utc>, window_secs: i64) {
        let cutoff = now - chrono::Duration::seconds(window_secs.max(1));
        let mut sites = self.sites.lock().await;
        sites.retain(|_, site| {
            site.starts.back().is_some_and(|t| *t > cutoff)
                || site
                    .last_notified
                    .is_some_and(|t| now - t < chrono::Duration::seconds(window_secs.max(1)))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn fires_only_past_threshold() {
        let detector = SpikeDetector::new(Duration::from_secs(900));
        for i in 0..3 {
            assert!(!detector.record_start("w1", 3, 60, at(i)).await);
        }
        assert!(detector.record_start("w1", 3, 60, at(3)).await);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_notifications() {
        let detector = SpikeDetector::new(Duration::from_secs(900));
        for i in 0..4 {
            detector.record_start("w1", 3, 3600, at(i)).await;
        }
        // Still above threshold, but inside the cooldown.
        assert!(!detector.record_start("w1", 3, 3600, at(10)).await);
        // Past the cooldown it may fire again.
        assert!(detector.record_start("w1", 3, 3600, at(901)).await);
    }

    #[tokio::test]
    async fn old_starts_fall_out_of_the_window() {
        let detector = SpikeDetector::new(Duration::from_secs(1));
        for i in 0..4 {
            detector.record_start("w1", 3, 60, at(i)).await;
        }
        // 70s later the earlier starts expired; count resets near zero.
        assert!(!detector.record_start("w1", 3, 60, at(70)).await);
    }

    #[tokio::test]
    async fn sites_are_independent() {
        let detector = SpikeDetector::new(Duration::from_secs(900));
        for i in 0..4 {
            detector.record_start("w1", 3, 60, at(i)).await;
        }
        assert!(!detector.record_start("w2", 3, 60, at(5)).await);
    }
}
