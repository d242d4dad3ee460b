//! Simulated banking environment used to train the decision policy.
//!
//! RULE: `step` is a pure function of (stats, action, transaction).
//! The generator owns the only RNG; learning owns none of this state.
//!
//! Reward table:
//!
//! | action | threat                  | legitimate                          |
//! |--------|-------------------------|-------------------------------------|
//! | allow  | −100, missed +1         | +10                                 |
//! | flag   | +50, detected +1        | −20, fp +1, satisfaction −2         |
//! | block  | +100, detected +1       | −50, fp +1, satisfaction −5         |

use crate::{
    config::EnvironmentConfig,
    features::{EnvSnapshot, FeatureSource},
    policy::Action,
    rng::StreamRng,
};
use serde::{Deserialize, Serialize};

pub const REWARD_MISSED_THREAT: f64 = -100.0;
pub const REWARD_ALLOWED_LEGIT: f64 = 10.0;
pub const REWARD_FLAGGED_THREAT: f64 = 50.0;
pub const REWARD_FLAGGED_LEGIT: f64 = -20.0;
pub const REWARD_BLOCKED_THREAT: f64 = 100.0;
pub const REWARD_BLOCKED_LEGIT: f64 = -50.0;

const SATISFACTION_COST_FLAG: f64 = 2.0;
const SATISFACTION_COST_BLOCK: f64 = 5.0;

const LEGIT_AMOUNTS: [f64; 8] = [10.0, 25.0, 50.0, 100.0, 200.0, 500.0, 1_000.0, 2_000.0];
const MERCHANTS: [&str; 6] = ["grocery", "gas", "restaurant", "retail", "atm", "online"];
const LOCATIONS: [&str; 5] = ["home", "work", "mall", "unknown", "foreign"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatArchetype {
    AccountTakeover,
    CardFraud,
    Phishing,
    MoneyLaundering,
    IdentityTheft,
    InsiderThreat,
}

impl ThreatArchetype {
    pub const ALL: [ThreatArchetype; 6] = [
        Self::AccountTakeover,
        Self::CardFraud,
        Self::Phishing,
        Self::MoneyLaundering,
        Self::IdentityTheft,
        Self::InsiderThreat,
    ];

    /// Boolean indicators this archetype always carries.
    pub fn indicators(&self) -> &'static [&'static str] {
        match self {
            Self::AccountTakeover => &["unusual_device", "location_mismatch", "rapid_transactions"],
            Self::CardFraud       => &["unusual_merchant"],
            Self::Phishing        => &["suspicious_ip", "credential_stuffing"],
            Self::MoneyLaundering => &["round_amounts", "rapid_transfers"],
            Self::IdentityTheft   => &["new_payee", "personal_info_change", "urgent_transfer"],
            Self::InsiderThreat   => &["admin_access", "bulk_data_access", "after_hours"],
        }
    }
}

/// One generated transaction, labeled with its ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticTransaction {
    pub hour: u32,
    pub amount: f64,
    pub merchant: String,
    pub location: String,
    pub device_id: String,
    pub source_ip: String,
    pub login_attempts: u32,
    pub indicators: Vec<String>,
    pub archetype: Option<ThreatArchetype>,
}

impl SyntheticTransaction {
    pub fn is_threat(&self) -> bool {
        self.archetype.is_some()
    }
}

impl FeatureSource for SyntheticTransaction {
    fn amount(&self) -> Option<f64> {
        Some(self.amount)
    }

    fn hour(&self) -> u32 {
        self.hour
    }

    fn location(&self) -> Option<&str> {
        Some(&self.location)
    }

    fn flag(&self, name: &str) -> bool {
        self.indicators.iter().any(|i| i == name)
    }
}

/// Running episode statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvStats {
    pub step: u32,
    pub detected: u32,
    pub false_positives: u32,
    pub missed: u32,
    pub satisfaction: f64,
}

impl EnvStats {
    pub fn new(initial_satisfaction: f64) -> Self {
        Self {
            step: 0,
            detected: 0,
            false_positives: 0,
            missed: 0,
            satisfaction: initial_satisfaction,
        }
    }

    pub fn detection_rate(&self) -> f64 {
        f64::from(self.detected) / f64::from((self.detected + self.missed).max(1))
    }

    pub fn false_positive_rate(&self) -> f64 {
        f64::from(self.false_positives) / f64::from(self.step.max(1))
    }

    pub fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot {
            detection_rate: self.detection_rate(),
            false_positive_rate: self.false_positive_rate(),
            satisfaction: self.satisfaction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub reward: f64,
    pub next: EnvStats,
    pub done: bool,
}

/// Apply one action to one transaction.
pub fn step(stats: &EnvStats, action: Action, txn: &SyntheticTransaction, episode_len: u32) -> Transition {
    let mut next = *stats;
    let threat = txn.is_threat();
    let reward = match (action, threat) {
        (Action::Allow, true) => {
            next.missed += 1;
            REWARD_MISSED_THREAT
        }
        (Action::Allow, false) => REWARD_ALLOWED_LEGIT,
        (Action::Flag, true) => {
            next.detected += 1;
            REWARD_FLAGGED_THREAT
        }
        (Action::Flag, false) => {
            next.false_positives += 1;
            next.satisfaction -= SATISFACTION_COST_FLAG;
            REWARD_FLAGGED_LEGIT
        }
        (Action::Block, true) => {
            next.detected += 1;
            REWARD_BLOCKED_THREAT
        }
        (Action::Block, false) => {
            next.false_positives += 1;
            next.satisfaction -= SATISFACTION_COST_BLOCK;
            REWARD_BLOCKED_LEGIT
        }
    };
    next.step += 1;
    Transition {
        reward,
        next,
        done: next.step >= episode_len,
    }
}

/// Transaction generator plus the current episode's stats.
pub struct BankingEnvironment {
    config: EnvironmentConfig,
    rng: StreamRng,
    stats: EnvStats,
}

impl BankingEnvironment {
    pub fn new(config: EnvironmentConfig, rng: StreamRng) -> Self {
        let stats = EnvStats::new(config.initial_satisfaction);
        Self { config, rng, stats }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn stats(&self) -> &EnvStats {
        &self.stats
    }

    pub fn reset(&mut self) -> EnvSnapshot {
        self.stats = EnvStats::new(self.config.initial_satisfaction);
        self.stats.snapshot()
    }

    /// Draw the next transaction: a threat with the configured probability,
    /// its archetype chosen uniformly.
    pub fn next_transaction(&mut self) -> SyntheticTransaction {
        let archetype = if self.rng.chance(self.config.threat_probability) {
            Some(*self.rng.pick(&ThreatArchetype::ALL))
        } else {
            None
        };
        self.generate(archetype)
    }

    pub fn generate(&mut self, archetype: Option<ThreatArchetype>) -> SyntheticTransaction {
        let rng = &mut self.rng;
        let mut txn = SyntheticTransaction {
            hour: rng.next_u64_below(24) as u32,
            amount: *rng.pick(&LEGIT_AMOUNTS),
            merchant: rng.pick(&MERCHANTS).to_string(),
            location: rng.pick(&LOCATIONS).to_string(),
            device_id: format!("device_{}", rng.range_inclusive(1, 100)),
            source_ip: format!(
                "192.168.{}.{}",
                rng.range_inclusive(1, 255),
                rng.range_inclusive(1, 255)
            ),
            login_attempts: 0,
            indicators: Vec::new(),
            archetype,
        };

        let Some(kind) = archetype else {
            return txn;
        };
        txn.indicators = kind.indicators().iter().map(|i| i.to_string()).collect();
        match kind {
            ThreatArchetype::AccountTakeover => {
                txn.amount = *rng.pick(&[5_000.0, 10_000.0, 15_000.0]);
            }
            ThreatArchetype::CardFraud => {
                txn.location = "foreign".into();
                txn.amount = *rng.pick(&[2_000.0, 5_000.0, 8_000.0]);
            }
            ThreatArchetype::Phishing => {
                txn.login_attempts = rng.range_inclusive(5, 15) as u32;
            }
            ThreatArchetype::MoneyLaundering => {
                txn.amount = *rng.pick(&[9_000.0, 9_500.0, 9_900.0]);
            }
            ThreatArchetype::IdentityTheft | ThreatArchetype::InsiderThreat => {}
        }
        txn
    }

    /// Apply an action against the live stats and advance them.
    pub fn apply(&mut self, action: Action, txn: &SyntheticTransaction) -> Transition {
        let transition = step(&self.stats, action, txn, self.config.episode_length);
        self.stats = transition.next;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ThreatConfig,
        rng::{RngBank, StreamSlot},
    };

    fn env(seed: u64) -> BankingEnvironment {
        let cfg = ThreatConfig::default_test();
        BankingEnvironment::new(cfg.environment, RngBank::new(seed).for_slot(StreamSlot::Environment))
    }

    #[test]
    fn same_seed_same_transactions() {
        let mut a = env(99);
        let mut b = env(99);
        for _ in 0..50 {
            assert_eq!(a.next_transaction(), b.next_transaction());
        }
    }

    #[test]
    fn laundering_sits_under_the_threshold() {
        let mut e = env(3);
        for _ in 0..30 {
            let txn = e.generate(Some(ThreatArchetype::MoneyLaundering));
            assert!([9_000.0, 9_500.0, 9_900.0].contains(&txn.amount));
            assert!(txn.flag("rapid_transfers"));
        }
    }

    #[test]
    fn episode_ends_at_configured_length() {
        let mut e = env(1);
        e.reset();
        let mut done_at = None;
        for i in 1..=1_000u32 {
            let txn = e.next_transaction();
            if e.apply(Action::Allow, &txn).done {
                done_at = Some(i);
                break;
            }
        }
        assert_eq!(done_at, Some(1_000));
    }

    #[test]
    fn ratios_guard_against_zero() {
        let stats = EnvStats::new(100.0);
        assert_eq!(stats.detection_rate(), 0.0);
        assert_eq!(stats.false_positive_rate(), 0.0);
    }
}
