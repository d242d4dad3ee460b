//! Per-source sliding windows.
//!
//! Two windows per source address:
//!   - every request, over `request_window_secs` → Ddos when the count
//!     exceeds `request_threshold`
//!   - failed logins, over `failed_login_window_secs` → BruteForce when the
//!     count exceeds `failed_login_threshold`
//!
//! Windows are pruned before counting, so a count only ever reflects the
//! trailing window ending at the current record's timestamp.
//!
//! State is sharded by source hash; each shard is its own mutex.
//! Each shard holds at most `max_sources / shards` sources. A new source
//! arriving at a full shard evicts idle sources first, then the one seen
//! least recently.

use crate::{
    config::RateConfig,
    detector::{DetectionContext, Detector},
    event::{AttackCategory, SecurityEvent, Severity},
    features::FeatureVector,
    types::{shard_of, SourceAddr, Timestamp},
};
use chrono::Duration;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
struct SourceWindow {
    requests: VecDeque<Timestamp>,
    failed_logins: VecDeque<Timestamp>,
    last_seen: Timestamp,
}

impl SourceWindow {
    fn new(now: Timestamp) -> Self {
        Self {
            requests: VecDeque::new(),
            failed_logins: VecDeque::new(),
            last_seen: now,
        }
    }
}

/// Records may arrive out of timestamp order; the window stays sorted.
fn insert_sorted(window: &mut VecDeque<Timestamp>, at: Timestamp) {
    let idx = window.partition_point(|t| *t <= at);
    window.insert(idx, at);
}

fn prune(window: &mut VecDeque<Timestamp>, cutoff: Timestamp) {
    while window.front().is_some_and(|t| *t < cutoff) {
        window.pop_front();
    }
}

/// Entries in `[cutoff, now]`. Entries stamped after `now` are kept but not counted.
fn count_until(window: &VecDeque<Timestamp>, now: Timestamp) -> usize {
    window.partition_point(|t| *t <= now)
}

/// Counts after recording one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounts {
    pub requests: usize,
    pub failed_logins: usize,
}

pub struct RateTracker {
    config: RateConfig,
    shards: Vec<Mutex<HashMap<SourceAddr, SourceWindow>>>,
    per_shard_capacity: usize,
}

impl RateTracker {
    pub fn new(config: RateConfig) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard_capacity = config.max_sources.div_ceil(shard_count).max(1);
        let shards = (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            config,
            shards,
            per_shard_capacity,
        }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    /// Record one request (and optionally a failed login) at `now`,
    /// returning the post-prune counts.
    pub fn record(&self, source: &str, now: Timestamp, failed_login: bool) -> WindowCounts {
        let request_cutoff = now - Duration::seconds(self.config.request_window_secs);
        let login_cutoff = now - Duration::seconds(self.config.failed_login_window_secs);

        let mut shard = self.shards[shard_of(source, self.shards.len())].lock();
        if !shard.contains_key(source) && shard.len() >= self.per_shard_capacity {
            self.evict(&mut shard, now);
        }
        let window = shard
            .entry(source.to_string())
            .or_insert_with(|| SourceWindow::new(now));

        insert_sorted(&mut window.requests, now);
        prune(&mut window.requests, request_cutoff);
        if failed_login {
            insert_sorted(&mut window.failed_logins, now);
        }
        prune(&mut window.failed_logins, login_cutoff);
        if now > window.last_seen {
            window.last_seen = now;
        }

        WindowCounts {
            requests: count_until(&window.requests, now),
            failed_logins: count_until(&window.failed_logins, now),
        }
    }

    fn evict(&self, shard: &mut HashMap<SourceAddr, SourceWindow>, now: Timestamp) {
        let longest = self
            .config
            .request_window_secs
            .max(self.config.failed_login_window_secs);
        let idle_cutoff = now - Duration::seconds(longest);
        let before = shard.len();
        shard.retain(|_, w| w.last_seen >= idle_cutoff);
        if shard.len() < self.per_shard_capacity {
            log::debug!("Evicted {} idle rate windows", before - shard.len());
            return;
        }
        let oldest = shard
            .iter()
            .min_by(|a, b| a.1.last_seen.cmp(&b.1.last_seen).then_with(|| a.0.cmp(b.0)))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            shard.remove(&key);
            log::debug!("Evicted least-recently-seen rate window for {key}");
        }
    }

    /// Effective threshold after the reputation bias.
    pub fn threshold(&self, base: usize, blocked: bool) -> usize {
        if blocked {
            (base as f64 * self.config.blocked_source_factor).floor() as usize
        } else {
            base
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_tracked(&self, source: &str) -> bool {
        self.shards[shard_of(source, self.shards.len())]
            .lock()
            .contains_key(source)
    }
}

impl Detector for RateTracker {
    fn name(&self) -> &'static str {
        "rate_tracker"
    }

    fn detect(&self, _features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent> {
        let entry = ctx.entry;
        let counts = self.record(&entry.source_ip, entry.timestamp, entry.is_failed_login());
        let blocked = ctx.source_blocked();

        let request_limit = self.threshold(self.config.request_threshold, blocked);
        if counts.requests > request_limit {
            log::debug!(
                "Request flood from {}: {} in {}s",
                entry.source_ip,
                counts.requests,
                self.config.request_window_secs
            );
            return Some(
                SecurityEvent::detected(
                    entry,
                    AttackCategory::Ddos,
                    Severity::High,
                    self.config.request_confidence,
                    self.name(),
                    format!(
                        "Rate limit exceeded: {} requests in {} seconds",
                        counts.requests, self.config.request_window_secs
                    ),
                )
                .with_factors(vec!["request_flood".into()]),
            );
        }

        let login_limit = self.threshold(self.config.failed_login_threshold, blocked);
        if counts.failed_logins > login_limit {
            return Some(
                SecurityEvent::detected(
                    entry,
                    AttackCategory::BruteForce,
                    Severity::High,
                    self.config.failed_login_confidence,
                    self.name(),
                    format!(
                        "Brute force: {} failed logins in {} seconds",
                        counts.failed_logins, self.config.failed_login_window_secs
                    ),
                )
                .with_factors(vec!["failed_login_burst".into()]),
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreatConfig;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap()
    }

    #[test]
    fn window_prunes_old_requests() {
        let tracker = RateTracker::new(ThreatConfig::default_test().rate);
        for i in 0..50 {
            tracker.record("1.1.1.1", t0() + Duration::milliseconds(i * 100), false);
        }
        let counts = tracker.record("1.1.1.1", t0() + Duration::seconds(70), false);
        assert_eq!(counts.requests, 1);
    }

    #[test]
    fn late_record_does_not_stall_pruning() {
        let tracker = RateTracker::new(ThreatConfig::default_test().rate);
        // A record stamped hours ahead arrives first.
        tracker.record("2.2.2.2", t0() + Duration::hours(6), false);
        let mut last = WindowCounts { requests: 0, failed_logins: 0 };
        for i in 0..150 {
            last = tracker.record("2.2.2.2", t0() + Duration::minutes(i * 10), false);
        }
        assert_eq!(last.requests, 1, "sparse traffic must never accumulate");
    }

    #[test]
    fn out_of_order_failures_are_counted_in_their_window() {
        let tracker = RateTracker::new(ThreatConfig::default_test().rate);
        tracker.record("3.3.3.3", t0() + Duration::hours(1), true);
        tracker.record("3.3.3.3", t0(), true);
        let counts = tracker.record("3.3.3.3", t0() + Duration::seconds(30), true);
        assert_eq!(counts.failed_logins, 2);
        assert_eq!(counts.requests, 2);
    }

    #[test]
    fn blocked_sources_get_a_lower_threshold() {
        let tracker = RateTracker::new(ThreatConfig::default_test().rate);
        assert_eq!(tracker.threshold(100, false), 100);
        assert_eq!(tracker.threshold(100, true), 50);
        assert_eq!(tracker.threshold(5, true), 2);
    }

    #[test]
    fn capacity_evicts_idle_then_oldest() {
        let mut config = ThreatConfig::default_test().rate;
        config.max_sources = 2;
        config.shards = 1;
        let tracker = RateTracker::new(config);

        tracker.record("a", t0(), false);
        tracker.record("b", t0() + Duration::seconds(10), false);
        tracker.record("c", t0() + Duration::seconds(20), false);
        assert_eq!(tracker.tracked_sources(), 2);
        assert!(!tracker.is_tracked("a"), "least recently seen source survived");

        // Far in the future, both b and c are idle and get swept together.
        tracker.record("d", t0() + Duration::hours(2), false);
        assert_eq!(tracker.tracked_sources(), 1);
        assert!(tracker.is_tracked("d"));
    }
}
