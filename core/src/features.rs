//! Feature encoder: raw records to a fixed-length vector and a
//! discretized state key.
//!
//! The encoder is pure and total: every input field has a default, so any
//! record (including an empty one) encodes without error.
//!
//! Vector layout (fixed, never reordered):
//!   0. amount / cap, clamped to [0, 1]
//!   1. hour of day / 24
//!   2. location risk
//!   3. device risk
//!   4. rapid-transactions flag
//!   5. rapid-transfers flag
//!   6. behavioral-anomaly flag
//!   7. suspicious-origin flag

use crate::{config::EncoderConfig, log_entry::LogEntry};
use serde::{Deserialize, Serialize};

pub const FEATURE_LEN: usize = 8;

pub const AMOUNT: usize = 0;
pub const HOUR: usize = 1;
pub const LOCATION: usize = 2;
pub const DEVICE: usize = 3;
pub const RAPID_TRANSACTIONS: usize = 4;
pub const RAPID_TRANSFERS: usize = 5;
pub const BEHAVIOR_ANOMALY: usize = 6;
pub const SUSPICIOUS_ORIGIN: usize = 7;

/// Indicators that mark a behavioral anomaly on their own. Wider than
/// `location_mismatch` alone so identity-theft and insider-threat records
/// land in distinct states.
const BEHAVIOR_FLAGS: [&str; 7] = [
    "location_mismatch",
    "new_payee",
    "personal_info_change",
    "urgent_transfer",
    "admin_access",
    "bulk_data_access",
    "after_hours",
];

/// `suspicious_ip` plus the phishing marker `credential_stuffing`.
const ORIGIN_FLAGS: [&str; 2] = ["suspicious_ip", "credential_stuffing"];

/// Read access to the fields the encoder needs.
/// Implemented by live log entries and by simulated transactions.
pub trait FeatureSource {
    fn amount(&self) -> Option<f64>;
    fn hour(&self) -> u32;
    fn location(&self) -> Option<&str>;
    fn flag(&self, name: &str) -> bool;
}

impl FeatureSource for LogEntry {
    fn amount(&self) -> Option<f64> {
        self.amount
    }

    fn hour(&self) -> u32 {
        LogEntry::hour(self)
    }

    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn flag(&self, name: &str) -> bool {
        LogEntry::flag(self, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: [f64; FEATURE_LEN],
}

impl FeatureVector {
    pub fn get(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    /// Mean over all features; used as a coarse risk score.
    pub fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / FEATURE_LEN as f64
    }
}

/// Environment-level ratios folded into every state key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub detection_rate: f64,
    pub false_positive_rate: f64,
    /// Customer satisfaction on its native 0–100 scale.
    pub satisfaction: f64,
}

/// Discretized features + environment ratios.
/// Dimensions: amount, hour band, location, device, velocity, anomaly,
/// detection rate, false-positive rate, satisfaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey(pub [u8; 9]);

#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    config: EncoderConfig,
}

impl FeatureEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn encode<R: FeatureSource + ?Sized>(&self, record: &R) -> FeatureVector {
        let cfg = &self.config;
        let mut values = [0.0; FEATURE_LEN];

        let amount = record.amount().unwrap_or(0.0).max(0.0);
        values[AMOUNT] = (amount / cfg.amount_cap).clamp(0.0, 1.0);
        values[HOUR] = f64::from(record.hour() % 24) / 24.0;
        values[LOCATION] = self.location_risk(record.location());
        values[DEVICE] = if record.flag("unusual_device") {
            cfg.device_unusual_score
        } else {
            cfg.device_known_score
        };
        values[RAPID_TRANSACTIONS] = self.flag_score(record.flag("rapid_transactions"));
        values[RAPID_TRANSFERS] = self.flag_score(record.flag("rapid_transfers"));
        values[BEHAVIOR_ANOMALY] =
            self.flag_score(BEHAVIOR_FLAGS.iter().any(|f| record.flag(f)));
        values[SUSPICIOUS_ORIGIN] = self.flag_score(ORIGIN_FLAGS.iter().any(|f| record.flag(f)));

        FeatureVector { values }
    }

    /// Missing location → the configured "unknown" label; labels outside
    /// the table → the unlisted default.
    pub fn location_risk(&self, location: Option<&str>) -> f64 {
        let label = location
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(self.config.missing_location.as_str())
            .to_ascii_lowercase();
        self.config
            .location_risk
            .get(&label)
            .copied()
            .unwrap_or(self.config.unlisted_location_risk)
    }

    pub fn state_key(&self, features: &FeatureVector, env: &EnvSnapshot) -> StateKey {
        let b = &self.config.buckets;
        let velocity = features.get(RAPID_TRANSACTIONS).max(features.get(RAPID_TRANSFERS));
        let anomaly = features.get(BEHAVIOR_ANOMALY).max(features.get(SUSPICIOUS_ORIGIN));
        let satisfaction = (env.satisfaction / 100.0).clamp(0.0, 1.0);
        StateKey([
            bucket(features.get(AMOUNT), b.amount),
            bucket(features.get(HOUR), b.hour),
            bucket(features.get(LOCATION), b.location),
            bucket(features.get(DEVICE), b.device),
            bucket(velocity, b.velocity),
            bucket(anomaly, b.anomaly),
            bucket(env.detection_rate, b.env_ratio),
            bucket(env.false_positive_rate, b.env_ratio),
            bucket(satisfaction, b.env_ratio),
        ])
    }

    fn flag_score(&self, on: bool) -> f64 {
        if on {
            self.config.flag_true_score
        } else {
            self.config.flag_false_score
        }
    }
}

/// `min(floor(x · n), n − 1)` for x clamped to [0, 1].
pub fn bucket(x: f64, n: u8) -> u8 {
    if n <= 1 || !x.is_finite() {
        return 0;
    }
    let scaled = (x.clamp(0.0, 1.0) * f64::from(n)).floor() as u8;
    scaled.min(n - 1)
}

/// Named indicators present on a record, for human-facing explanations.
pub fn threat_indicators<R: FeatureSource + ?Sized>(record: &R) -> Vec<&'static str> {
    let mut out = Vec::new();
    if record.amount().unwrap_or(0.0) > 5_000.0 {
        out.push("high_amount");
    }
    if record
        .location()
        .is_some_and(|l| l.eq_ignore_ascii_case("foreign"))
    {
        out.push("foreign_location");
    }
    if record.flag("unusual_device") {
        out.push("unusual_device");
    }
    if record.flag("rapid_transactions") || record.flag("rapid_transfers") {
        out.push("velocity_anomaly");
    }
    if record.flag("suspicious_ip") {
        out.push("suspicious_ip");
    }
    let hour = record.hour();
    if !(6..=22).contains(&hour) {
        out.push("unusual_time");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreatConfig;
    use chrono::{TimeZone, Utc};

    fn encoder() -> FeatureEncoder {
        FeatureEncoder::new(ThreatConfig::default_test().encoder)
    }

    fn noon() -> crate::types::Timestamp {
        Utc.with_ymd_and_hms(2024, 12, 28, 12, 0, 0).unwrap()
    }

    #[test]
    fn amount_is_capped() {
        let enc = encoder();
        let big = LogEntry::at(noon(), "1.1.1.1").with_amount(50_000.0);
        let small = LogEntry::at(noon(), "1.1.1.1").with_amount(2_500.0);
        assert_eq!(enc.encode(&big).get(AMOUNT), 1.0);
        assert!((enc.encode(&small).get(AMOUNT) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn unlisted_location_uses_default() {
        let enc = encoder();
        assert_eq!(enc.location_risk(Some("Foreign")), 0.9);
        assert_eq!(enc.location_risk(Some("atlantis")), 0.5);
        assert_eq!(enc.location_risk(None), 0.7);
        assert_eq!(enc.location_risk(Some("  ")), 0.7);
    }

    #[test]
    fn flags_use_configured_scores() {
        let enc = encoder();
        let entry = LogEntry::at(noon(), "1.1.1.1")
            .with_flag("unusual_device", true)
            .with_flag("new_payee", true);
        let fv = enc.encode(&entry);
        assert_eq!(fv.get(DEVICE), 0.8);
        assert_eq!(fv.get(BEHAVIOR_ANOMALY), 1.0);
        assert_eq!(fv.get(RAPID_TRANSFERS), 0.1);
        assert_eq!(fv.get(SUSPICIOUS_ORIGIN), 0.1);

        let stuffing = LogEntry::at(noon(), "1.1.1.1").with_flag("credential_stuffing", true);
        assert_eq!(enc.encode(&stuffing).get(SUSPICIOUS_ORIGIN), 1.0);
    }

    #[test]
    fn empty_record_encodes_to_documented_defaults() {
        let enc = encoder();
        let expected_tail = [0.7, 0.1, 0.1, 0.1, 0.1, 0.1];

        let bare = LogEntry::at(noon(), "1.1.1.1");
        let fv = enc.encode(&bare);
        assert_eq!(fv.values.len(), FEATURE_LEN);
        assert_eq!(fv.get(AMOUNT), 0.0);
        assert_eq!(fv.get(HOUR), 0.5);
        assert_eq!(fv.values[LOCATION..], expected_tail);

        let decoded = LogEntry::from_value(serde_json::json!({})).unwrap();
        let fv = enc.encode(&decoded);
        assert_eq!(fv.get(AMOUNT), 0.0);
        assert!((0.0..1.0).contains(&fv.get(HOUR)));
        assert_eq!(fv.values[LOCATION..], expected_tail);
        assert!(fv.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn state_key_is_deterministic() {
        let enc = encoder();
        let env = EnvSnapshot {
            detection_rate: 0.85,
            false_positive_rate: 0.05,
            satisfaction: 95.0,
        };
        let a = LogEntry::at(noon(), "1.1.1.1").with_amount(120.0).with_payload("a");
        let b = LogEntry::at(noon(), "9.9.9.9").with_amount(130.0).with_payload("b");
        let ka = enc.state_key(&enc.encode(&a), &env);
        let kb = enc.state_key(&enc.encode(&b), &env);
        assert_eq!(ka, kb);
        assert_eq!(ka.0[6..], [8, 0, 9]);
    }

    #[test]
    fn bucket_clamps_edges() {
        assert_eq!(bucket(1.0, 10), 9);
        assert_eq!(bucket(0.0, 10), 0);
        assert_eq!(bucket(-3.0, 10), 0);
        assert_eq!(bucket(f64::NAN, 10), 0);
        assert_eq!(bucket(0.55, 2), 1);
        assert_eq!(bucket(0.7, 1), 0);
    }

    #[test]
    fn indicators_for_card_fraud_shape() {
        let entry = LogEntry::at(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap(), "x")
            .with_amount(8_000.0)
            .with_location("foreign")
            .with_flag("unusual_device", true);
        let found = threat_indicators(&entry);
        assert_eq!(
            found,
            vec!["high_amount", "foreign_location", "unusual_device", "unusual_time"]
        );
    }
}
