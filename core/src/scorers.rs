//! Weighted anomaly scorers: login, transaction fraud, behavioral deviation.
//!
//! Each scorer has a pure `score` over its signal struct that sums the
//! weights of the factors present, capped at 1.0, and reports which factors
//! fired. The Detector impls build the signals from the user's baseline and
//! turn a score above the activation threshold into an event.

use crate::{
    config::{BehaviorScorerConfig, FraudScorerConfig, LoginScorerConfig},
    detector::{DetectionContext, Detector},
    event::{AttackCategory, SecurityEvent, Severity},
    features::{FeatureVector, LOCATION},
    profile::{BehaviorSignals, FraudSignals, LoginSignals, UserProfiles},
};
use std::sync::Arc;

/// Float slack for threshold comparisons, so 0.4 + 0.2 does not exceed 0.6.
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub value: f64,
    pub factors: Vec<&'static str>,
}

impl Score {
    fn new() -> Self {
        Self {
            value: 0.0,
            factors: Vec::new(),
        }
    }

    fn add(&mut self, present: bool, weight: f64, factor: &'static str) {
        if present {
            self.value += weight;
            self.factors.push(factor);
        }
    }

    fn finish(mut self) -> Self {
        self.value = self.value.min(1.0);
        self
    }

    /// Strictly above `threshold`, with float slack.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.value - threshold > SCORE_EPSILON
    }

    fn at_least(&self, threshold: f64) -> bool {
        self.value - threshold > -SCORE_EPSILON
    }

    fn owned_factors(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.to_string()).collect()
    }
}

// ── Login anomaly ─────────────────────────────────────────────────

pub struct LoginScorer {
    config: LoginScorerConfig,
    suspicious_bias: f64,
    profiles: Arc<UserProfiles>,
}

impl LoginScorer {
    pub fn new(config: LoginScorerConfig, suspicious_bias: f64, profiles: Arc<UserProfiles>) -> Self {
        Self {
            config,
            suspicious_bias,
            profiles,
        }
    }

    pub fn score(&self, s: &LoginSignals) -> Score {
        let c = &self.config;
        let mut score = Score::new();
        score.add(s.failed_attempts > c.failed_attempts_threshold, c.failures_weight, "multiple_failures");
        score.add(s.location_anomaly, c.location_weight, "location_anomaly");
        score.add(
            s.hour < c.quiet_hours_start || s.hour > c.quiet_hours_end,
            c.unusual_hour_weight,
            "unusual_hour",
        );
        score.add(s.device_mismatch, c.device_weight, "device_mismatch");
        score.add(s.known_suspicious, self.suspicious_bias, "known_suspicious");
        score.finish()
    }

    /// None below activation; MEDIUM below the high band, HIGH at or above it.
    pub fn severity(&self, score: &Score) -> Option<Severity> {
        if !score.exceeds(self.config.activation) {
            return None;
        }
        Some(if score.at_least(self.config.high_band) {
            Severity::High
        } else {
            Severity::Medium
        })
    }
}

impl Detector for LoginScorer {
    fn name(&self) -> &'static str {
        "login_anomaly"
    }

    fn detect(&self, _features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent> {
        let entry = ctx.entry;
        let user = entry.user_id.as_deref()?;
        if !entry.is_login() {
            return None;
        }
        let mut signals = self.profiles.login_signals(user, entry);
        signals.known_suspicious = ctx.user_suspicious();
        let score = self.score(&signals);
        let severity = self.severity(&score)?;
        Some(
            SecurityEvent::detected(
                entry,
                AttackCategory::SuspiciousLogin,
                severity,
                score.value,
                self.name(),
                format!("Suspicious login behavior detected: {}", score.factors.join(", ")),
            )
            .with_factors(score.owned_factors()),
        )
    }
}

// ── Transaction fraud ─────────────────────────────────────────────

pub struct FraudScorer {
    config: FraudScorerConfig,
    suspicious_bias: f64,
    profiles: Arc<UserProfiles>,
}

impl FraudScorer {
    pub fn new(config: FraudScorerConfig, suspicious_bias: f64, profiles: Arc<UserProfiles>) -> Self {
        Self {
            config,
            suspicious_bias,
            profiles,
        }
    }

    pub fn score(&self, s: &FraudSignals) -> Score {
        let c = &self.config;
        let mut score = Score::new();
        score.add(s.amount > c.amount_threshold, c.amount_weight, "high_amount");
        score.add(s.recent_transactions > c.velocity_threshold, c.velocity_weight, "high_velocity");
        score.add(
            s.hour < c.off_hours_start || s.hour > c.off_hours_end,
            c.off_hours_weight,
            "unusual_time",
        );
        score.add(s.location_risk > c.location_risk_threshold, c.location_weight, "location_risk");
        score.add(s.known_suspicious, self.suspicious_bias, "known_suspicious");
        score.finish()
    }

    /// None below activation; CRITICAL strictly above the critical band, else HIGH.
    pub fn severity(&self, score: &Score) -> Option<Severity> {
        if !score.exceeds(self.config.activation) {
            return None;
        }
        Some(if score.exceeds(self.config.critical_band) {
            Severity::Critical
        } else {
            Severity::High
        })
    }

    /// Amounts just under the reporting threshold are structuring.
    pub fn category(&self, amount: f64) -> AttackCategory {
        if amount >= self.config.structuring_floor && amount < self.config.amount_threshold {
            AttackCategory::MoneyLaundering
        } else {
            AttackCategory::FraudTransaction
        }
    }
}

impl Detector for FraudScorer {
    fn name(&self) -> &'static str {
        "transaction_fraud"
    }

    fn detect(&self, features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent> {
        let entry = ctx.entry;
        if !entry.is_transaction() {
            return None;
        }
        let mut signals = self
            .profiles
            .fraud_signals(entry.user_id.as_deref(), entry, features.get(LOCATION));
        signals.known_suspicious = ctx.user_suspicious();
        let score = self.score(&signals);
        let severity = self.severity(&score)?;
        Some(
            SecurityEvent::detected(
                entry,
                self.category(signals.amount),
                severity,
                score.value,
                self.name(),
                format!("Fraudulent transaction detected: {}", score.factors.join(", ")),
            )
            .with_factors(score.owned_factors()),
        )
    }
}

// ── Behavioral deviation ──────────────────────────────────────────

pub struct BehaviorScorer {
    config: BehaviorScorerConfig,
    suspicious_bias: f64,
    profiles: Arc<UserProfiles>,
}

impl BehaviorScorer {
    pub fn new(config: BehaviorScorerConfig, suspicious_bias: f64, profiles: Arc<UserProfiles>) -> Self {
        Self {
            config,
            suspicious_bias,
            profiles,
        }
    }

    pub fn score(&self, s: &BehaviorSignals) -> Score {
        let c = &self.config;
        let mut score = Score::new();
        score.add(
            s.pattern_deviation > c.pattern_deviation_threshold,
            c.pattern_weight,
            "pattern_deviation",
        );
        score.add(s.access_change > c.access_change_threshold, c.access_weight, "access_pattern_change");
        score.add(s.new_device && s.source_changed, c.device_change_weight, "new_device_new_source");
        score.add(s.known_suspicious, self.suspicious_bias, "known_suspicious");
        score.finish()
    }

    pub fn severity(&self, score: &Score) -> Option<Severity> {
        if !score.exceeds(self.config.activation) {
            return None;
        }
        Some(if score.at_least(self.config.high_band) {
            Severity::High
        } else {
            Severity::Medium
        })
    }
}

impl Detector for BehaviorScorer {
    fn name(&self) -> &'static str {
        "behavioral_deviation"
    }

    fn detect(&self, _features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent> {
        let entry = ctx.entry;
        let user = entry.user_id.as_deref()?;
        let mut signals = self.profiles.behavior_signals(user, entry);
        signals.known_suspicious = ctx.user_suspicious();
        let score = self.score(&signals);
        let severity = self.severity(&score)?;
        let category = if signals.new_device && signals.source_changed {
            AttackCategory::SessionHijack
        } else {
            AttackCategory::AccountTakeover
        };
        Some(
            SecurityEvent::detected(
                entry,
                category,
                severity,
                score.value,
                self.name(),
                format!("Behavioral deviation detected: {}", score.factors.join(", ")),
            )
            .with_factors(score.owned_factors()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreatConfig;

    fn parts() -> (ThreatConfig, Arc<UserProfiles>) {
        let cfg = ThreatConfig::default_test();
        let profiles = Arc::new(UserProfiles::new(&cfg.scorers));
        (cfg, profiles)
    }

    #[test]
    fn login_weights_sum_and_band() {
        let (cfg, profiles) = parts();
        let scorer = LoginScorer::new(cfg.scorers.login, 0.1, profiles);

        let s = LoginSignals {
            failed_attempts: 4,
            location_anomaly: true,
            hour: 12,
            ..Default::default()
        };
        let score = scorer.score(&s);
        assert!((score.value - 0.7).abs() < 1e-9);
        assert_eq!(score.factors, vec!["multiple_failures", "location_anomaly"]);
        assert_eq!(scorer.severity(&score), Some(Severity::Medium));

        let s = LoginSignals {
            failed_attempts: 4,
            location_anomaly: true,
            device_mismatch: true,
            hour: 12,
            ..Default::default()
        };
        assert_eq!(scorer.severity(&scorer.score(&s)), Some(Severity::High));
    }

    #[test]
    fn exactly_at_activation_does_not_fire() {
        let (cfg, profiles) = parts();
        let scorer = LoginScorer::new(cfg.scorers.login, 0.1, profiles);
        let s = LoginSignals {
            failed_attempts: 4,
            hour: 3,
            ..Default::default()
        };
        let score = scorer.score(&s);
        assert_eq!(score.factors, vec!["multiple_failures", "unusual_hour"]);
        assert_eq!(scorer.severity(&score), None);
    }

    #[test]
    fn fraud_score_caps_at_one_and_goes_critical() {
        let (cfg, profiles) = parts();
        let scorer = FraudScorer::new(cfg.scorers.fraud, 0.1, profiles);
        let s = FraudSignals {
            amount: 25_000.0,
            recent_transactions: 8,
            hour: 2,
            location_risk: 0.9,
            known_suspicious: true,
        };
        let score = scorer.score(&s);
        assert_eq!(score.value, 1.0);
        assert_eq!(scorer.severity(&score), Some(Severity::Critical));
        assert_eq!(scorer.category(s.amount), AttackCategory::FraudTransaction);
    }

    #[test]
    fn structuring_band_is_money_laundering() {
        let (cfg, profiles) = parts();
        let scorer = FraudScorer::new(cfg.scorers.fraud, 0.1, profiles);
        assert_eq!(scorer.category(9_500.0), AttackCategory::MoneyLaundering);
        assert_eq!(scorer.category(9_000.0), AttackCategory::MoneyLaundering);
        assert_eq!(scorer.category(10_000.0), AttackCategory::FraudTransaction);
        assert_eq!(scorer.category(8_999.0), AttackCategory::FraudTransaction);
    }

    #[test]
    fn behavior_needs_two_factors() {
        let (cfg, profiles) = parts();
        let scorer = BehaviorScorer::new(cfg.scorers.behavior, 0.1, profiles);
        let one = BehaviorSignals {
            pattern_deviation: 0.9,
            ..Default::default()
        };
        assert_eq!(scorer.severity(&scorer.score(&one)), None);
        let two = BehaviorSignals {
            pattern_deviation: 0.9,
            access_change: 0.75,
            ..Default::default()
        };
        assert_eq!(scorer.severity(&scorer.score(&two)), Some(Severity::Medium));
        let all = BehaviorSignals {
            pattern_deviation: 0.9,
            access_change: 0.75,
            new_device: true,
            source_changed: true,
            known_suspicious: false,
        };
        assert_eq!(scorer.severity(&scorer.score(&all)), Some(Severity::High));
    }
}
