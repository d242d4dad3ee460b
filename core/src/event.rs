//! Security events: the single unit of detector output.
//!
//! RULE: Detectors only ever produce SecurityEvents.
//! A detector never blocks, alerts or persists anything itself;
//! those side effects belong to the action executor.

use crate::{
    log_entry::LogEntry,
    types::{SourceAddr, Timestamp, UserId},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of attack categories.
/// Variants may be appended, never removed or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackCategory {
    InjectionAttack,
    CrossSiteScript,
    BruteForce,
    AccountTakeover,
    FraudTransaction,
    ApiAbuse,
    Ddos,
    SessionHijack,
    SuspiciousLogin,
    MoneyLaundering,
}

impl AttackCategory {
    pub const ALL: [AttackCategory; 10] = [
        Self::InjectionAttack,
        Self::CrossSiteScript,
        Self::BruteForce,
        Self::AccountTakeover,
        Self::FraudTransaction,
        Self::ApiAbuse,
        Self::Ddos,
        Self::SessionHijack,
        Self::SuspiciousLogin,
        Self::MoneyLaundering,
    ];

    /// Stable label used in the event store and dashboard.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InjectionAttack  => "SQL_INJECTION",
            Self::CrossSiteScript  => "XSS",
            Self::BruteForce       => "BRUTE_FORCE",
            Self::AccountTakeover  => "ACCOUNT_TAKEOVER",
            Self::FraudTransaction => "FRAUD_TRANSACTION",
            Self::ApiAbuse         => "API_ABUSE",
            Self::Ddos             => "DDOS",
            Self::SessionHijack    => "SESSION_HIJACKING",
            Self::SuspiciousLogin  => "SUSPICIOUS_LOGIN",
            Self::MoneyLaundering  => "MONEY_LAUNDERING",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low      => "LOW",
            Self::Medium   => "MEDIUM",
            Self::High     => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == label)
    }

    /// HIGH and CRITICAL trigger blocking.
    pub fn is_blocking(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executor did about an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTaken {
    Logged,
    Flagged,
    Blocked,
}

impl ActionTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logged  => "LOGGED",
            Self::Flagged => "FLAGGED",
            Self::Blocked => "BLOCKED",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [Self::Logged, Self::Flagged, Self::Blocked]
            .into_iter()
            .find(|a| a.as_str() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Taken from the originating record so replays produce the same key.
    pub timestamp: Timestamp,
    pub category: AttackCategory,
    pub severity: Severity,
    pub source_ip: SourceAddr,
    pub user_id: Option<UserId>,
    pub description: String,
    /// In [0, 1].
    pub confidence: f64,
    /// Name of the detector that produced this event.
    pub detector: String,
    pub factors: Vec<String>,
    pub raw: LogEntry,
    pub action_taken: ActionTaken,
}

impl SecurityEvent {
    /// A freshly detected event, not yet acted on.
    pub fn detected(
        entry: &LogEntry,
        category: AttackCategory,
        severity: Severity,
        confidence: f64,
        detector: &str,
        description: String,
    ) -> Self {
        Self {
            timestamp: entry.timestamp,
            category,
            severity,
            source_ip: entry.source_ip.clone(),
            user_id: entry.user_id.clone(),
            description,
            confidence: confidence.clamp(0.0, 1.0),
            detector: detector.to_string(),
            factors: Vec::new(),
            raw: entry.clone(),
            action_taken: ActionTaken::Logged,
        }
    }

    pub fn with_factors(mut self, factors: Vec<String>) -> Self {
        self.factors = factors;
        self
    }

    /// Idempotency key: timestamp + source + category.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            self.source_ip,
            self.category.as_str()
        )
    }
}
