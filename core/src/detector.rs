//! Detector trait.
//!
//! RULE: Every detection strategy implements Detector.
//! The pipeline calls detect() on each registered detector
//! in registration order, once per log entry.
//! A detector may update its own windows or baselines, but it
//! never touches reputation state; that belongs to the executor.

use crate::{
    event::SecurityEvent,
    features::FeatureVector,
    log_entry::LogEntry,
    reputation::ReputationStore,
};

/// Everything a detector may look at besides the feature vector.
#[derive(Clone, Copy)]
pub struct DetectionContext<'a> {
    pub entry: &'a LogEntry,
    pub reputation: &'a ReputationStore,
}

impl<'a> DetectionContext<'a> {
    pub fn new(entry: &'a LogEntry, reputation: &'a ReputationStore) -> Self {
        Self { entry, reputation }
    }

    pub fn source_blocked(&self) -> bool {
        self.reputation.is_blocked(&self.entry.source_ip)
    }

    pub fn user_suspicious(&self) -> bool {
        self.entry
            .user_id
            .as_deref()
            .is_some_and(|u| self.reputation.is_suspicious(u))
    }
}

/// The contract every detection strategy must fulfill.
pub trait Detector: Send + Sync {
    /// Unique stable name, recorded on every event this detector emits.
    fn name(&self) -> &'static str;

    /// Inspect one entry. Returns at most one candidate event.
    fn detect(&self, features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent>;
}
