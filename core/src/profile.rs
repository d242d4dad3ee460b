//! Per-user behavioral baselines.
//!
//! RULE: Baselines are read before scoring and updated after it.
//! A record is never compared against a baseline that already contains it.
//!
//! Each user keeps bounded lists of the locations, devices and sources seen,
//! recent transaction amounts, and timestamps of recent failed logins and
//! transactions. The scorers never see a profile directly; they get the
//! small signal structs built here.

use crate::{
    config::ScorerConfig,
    log_entry::LogEntry,
    types::{shard_of, SourceAddr, Timestamp, UserId},
};
use chrono::Duration;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Minimum prior amounts before amount deviation is meaningful.
const MIN_AMOUNT_HISTORY: usize = 3;

// ── Signals ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginSignals {
    /// Recent failures including the current attempt.
    pub failed_attempts: u32,
    pub location_anomaly: bool,
    pub device_mismatch: bool,
    pub hour: u32,
    pub known_suspicious: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FraudSignals {
    pub amount: f64,
    /// Transactions in the velocity window including the current one.
    pub recent_transactions: usize,
    pub hour: u32,
    pub location_risk: f64,
    pub known_suspicious: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorSignals {
    /// Relative distance of the amount from the user's mean, in [0, 1].
    pub pattern_deviation: f64,
    /// Share of access attributes never seen before, in [0, 1].
    pub access_change: f64,
    pub new_device: bool,
    pub source_changed: bool,
    pub known_suspicious: bool,
}

// ── Profile ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct UserProfile {
    locations: VecDeque<String>,
    devices: VecDeque<String>,
    sources: VecDeque<SourceAddr>,
    amounts: VecDeque<f64>,
    /// Bit per six-hour band the user has been active in.
    hour_bands: u8,
    failures: VecDeque<Timestamp>,
    transactions: VecDeque<Timestamp>,
    last_source: Option<SourceAddr>,
    last_seen: Timestamp,
}

impl UserProfile {
    fn new(now: Timestamp) -> Self {
        Self {
            locations: VecDeque::new(),
            devices: VecDeque::new(),
            sources: VecDeque::new(),
            amounts: VecDeque::new(),
            hour_bands: 0,
            failures: VecDeque::new(),
            transactions: VecDeque::new(),
            last_source: None,
            last_seen: now,
        }
    }

    fn is_empty(&self) -> bool {
        self.last_source.is_none()
    }
}

fn remember<T: PartialEq>(list: &mut VecDeque<T>, value: T, capacity: usize) {
    if list.contains(&value) {
        return;
    }
    if list.len() >= capacity {
        list.pop_front();
    }
    list.push_back(value);
}

/// Entries in `[cutoff, now]`; arrival order is not assumed.
fn count_within(times: &VecDeque<Timestamp>, cutoff: Timestamp, now: Timestamp) -> usize {
    times.iter().filter(|t| **t >= cutoff && **t <= now).count()
}

fn hour_band(hour: u32) -> u8 {
    1 << ((hour % 24) / 6)
}

pub struct UserProfiles {
    shards: Vec<Mutex<HashMap<UserId, UserProfile>>>,
    per_shard_capacity: usize,
    baseline_capacity: usize,
    failure_memory: Duration,
    velocity_window: Duration,
}

impl UserProfiles {
    pub fn new(config: &ScorerConfig) -> Self {
        let shard_count = config.shards.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            per_shard_capacity: config.max_profiles.div_ceil(shard_count).max(1),
            baseline_capacity: config.baseline_capacity.max(1),
            failure_memory: Duration::seconds(config.failure_memory_secs),
            velocity_window: Duration::seconds(config.fraud.velocity_window_secs),
        }
    }

    fn shard(&self, user: &str) -> &Mutex<HashMap<UserId, UserProfile>> {
        &self.shards[shard_of(user, self.shards.len())]
    }

    pub fn login_signals(&self, user: &str, entry: &LogEntry) -> LoginSignals {
        let shard = self.shard(user).lock();
        let current_failure = u32::from(entry.is_failed_login());
        let Some(profile) = shard.get(user) else {
            return LoginSignals {
                failed_attempts: current_failure,
                hour: entry.hour(),
                ..Default::default()
            };
        };
        let prior = count_within(&profile.failures, entry.timestamp - self.failure_memory, entry.timestamp);
        LoginSignals {
            failed_attempts: prior as u32 + current_failure,
            location_anomaly: entry.location.as_ref().is_some_and(|l| {
                !profile.locations.is_empty() && !profile.locations.contains(l)
            }),
            device_mismatch: entry.device_fingerprint.as_ref().is_some_and(|d| {
                !profile.devices.is_empty() && !profile.devices.contains(d)
            }),
            hour: entry.hour(),
            known_suspicious: false,
        }
    }

    pub fn fraud_signals(&self, user: Option<&str>, entry: &LogEntry, location_risk: f64) -> FraudSignals {
        let prior = user
            .map(|u| {
                self.shard(u).lock().get(u).map_or(0, |p| {
                    count_within(&p.transactions, entry.timestamp - self.velocity_window, entry.timestamp)
                })
            })
            .unwrap_or(0);
        FraudSignals {
            amount: entry.amount.unwrap_or(0.0),
            recent_transactions: prior + 1,
            hour: entry.hour(),
            location_risk,
            known_suspicious: false,
        }
    }

    pub fn behavior_signals(&self, user: &str, entry: &LogEntry) -> BehaviorSignals {
        let shard = self.shard(user).lock();
        let Some(profile) = shard.get(user).filter(|p| !p.is_empty()) else {
            return BehaviorSignals::default();
        };

        let pattern_deviation = match entry.amount {
            Some(amount) if profile.amounts.len() >= MIN_AMOUNT_HISTORY => {
                let mean = profile.amounts.iter().sum::<f64>() / profile.amounts.len() as f64;
                ((amount - mean).abs() / mean.max(1.0)).min(1.0)
            }
            _ => 0.0,
        };

        let source_changed = profile.last_source.as_deref() != Some(entry.source_ip.as_str());
        let new_source = !profile.sources.contains(&entry.source_ip);
        let new_device = entry
            .device_fingerprint
            .as_ref()
            .is_some_and(|d| !profile.devices.is_empty() && !profile.devices.contains(d));
        let new_location = entry
            .location
            .as_ref()
            .is_some_and(|l| !profile.locations.is_empty() && !profile.locations.contains(l));
        let new_hour = profile.hour_bands & hour_band(entry.hour()) == 0;
        let novel = [new_source, new_device, new_location, new_hour]
            .iter()
            .filter(|b| **b)
            .count();

        BehaviorSignals {
            pattern_deviation,
            access_change: novel as f64 / 4.0,
            new_device,
            source_changed,
            known_suspicious: false,
        }
    }

    /// Fold a record into its user's baseline. Records without a user are ignored.
    pub fn observe(&self, entry: &LogEntry) {
        let Some(user) = entry.user_id.as_deref() else {
            return;
        };
        let now = entry.timestamp;
        let mut shard = self.shard(user).lock();
        if !shard.contains_key(user) && shard.len() >= self.per_shard_capacity {
            let oldest = shard
                .iter()
                .min_by(|a, b| a.1.last_seen.cmp(&b.1.last_seen).then_with(|| a.0.cmp(b.0)))
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                shard.remove(&key);
            }
        }
        let cap = self.baseline_capacity;
        let profile = shard
            .entry(user.to_string())
            .or_insert_with(|| UserProfile::new(now));

        if let Some(location) = &entry.location {
            remember(&mut profile.locations, location.clone(), cap);
        }
        if let Some(device) = &entry.device_fingerprint {
            remember(&mut profile.devices, device.clone(), cap);
        }
        remember(&mut profile.sources, entry.source_ip.clone(), cap);
        profile.hour_bands |= hour_band(entry.hour());

        if entry.is_transaction() {
            if let Some(amount) = entry.amount {
                if profile.amounts.len() >= cap {
                    profile.amounts.pop_front();
                }
                profile.amounts.push_back(amount);
            }
            profile.transactions.push_back(now);
        }
        if entry.is_failed_login() {
            profile.failures.push_back(now);
        }

        let failure_cutoff = now - self.failure_memory;
        profile.failures.retain(|t| *t >= failure_cutoff);
        let velocity_cutoff = now - self.velocity_window;
        profile.transactions.retain(|t| *t >= velocity_cutoff);

        profile.last_source = Some(entry.source_ip.clone());
        if now > profile.last_seen {
            profile.last_seen = now;
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreatConfig;
    use chrono::{TimeZone, Utc};

    fn profiles() -> UserProfiles {
        UserProfiles::new(&ThreatConfig::default_test().scorers)
    }

    fn at(min: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn unknown_user_has_no_anomalies() {
        let p = profiles();
        let entry = LogEntry::at(at(0), "1.1.1.1")
            .with_user("alice")
            .with_location("foreign")
            .with_device("dev-9");
        let s = p.login_signals("alice", &entry);
        assert!(!s.location_anomaly);
        assert!(!s.device_mismatch);
        assert_eq!(p.behavior_signals("alice", &entry), BehaviorSignals::default());
    }

    #[test]
    fn new_location_and_device_deviate_from_baseline() {
        let p = profiles();
        p.observe(
            &LogEntry::at(at(0), "1.1.1.1")
                .with_user("alice")
                .with_location("home")
                .with_device("dev-1"),
        );
        let entry = LogEntry::at(at(5), "2.2.2.2")
            .with_user("alice")
            .with_location("foreign")
            .with_device("dev-9");
        let login = p.login_signals("alice", &entry);
        assert!(login.location_anomaly);
        assert!(login.device_mismatch);
        let behavior = p.behavior_signals("alice", &entry);
        assert!(behavior.new_device && behavior.source_changed);
        assert_eq!(behavior.access_change, 0.75);
    }

    #[test]
    fn failures_expire_after_memory_window() {
        let p = profiles();
        let fail = |m| {
            LogEntry::at(at(m), "1.1.1.1")
                .with_user("bob")
                .with_endpoint("POST", "/api/auth/login")
                .with_status(401)
        };
        for m in 0..3 {
            p.observe(&fail(m));
        }
        assert_eq!(p.login_signals("bob", &fail(10)).failed_attempts, 4);
        assert_eq!(p.login_signals("bob", &fail(120)).failed_attempts, 1);
    }

    #[test]
    fn velocity_counts_current_transaction() {
        let p = profiles();
        let txn = |s: i64| {
            LogEntry::at(at(0) + Duration::seconds(s), "1.1.1.1")
                .with_user("carol")
                .with_endpoint("POST", "/api/transactions")
                .with_amount(50.0)
        };
        for s in 0..5 {
            p.observe(&txn(s * 5));
        }
        let signals = p.fraud_signals(Some("carol"), &txn(30), 0.1);
        assert_eq!(signals.recent_transactions, 6);
        let later = p.fraud_signals(Some("carol"), &txn(200), 0.1);
        assert_eq!(later.recent_transactions, 1);
    }
}
