//! The classification pipeline: one log entry in, at most one acted-on
//! event out.
//!
//! DETECTOR ORDER (fixed, documented, never reordered):
//!   1. Pattern matcher
//!   2. Rate tracker
//!   3. Login anomaly scorer
//!   4. Transaction fraud scorer
//!   5. Behavioral deviation scorer
//!   6. Decision policy (reclassification)
//!
//! RULES:
//!   - Every detector sees every entry, in registration order.
//!   - Aggregation ties fall to the earlier detector, so order matters.
//!   - User baselines are updated only after every detector has run.
//!   - Reputation changes happen in the executor, after aggregation.

use crate::{
    aggregator,
    config::ThreatConfig,
    detector::{DetectionContext, Detector},
    event::SecurityEvent,
    executor::{ActionExecutor, AlertSink},
    features::{EnvSnapshot, FeatureEncoder},
    log_entry::LogEntry,
    pattern_matcher::PatternMatcher,
    policy::{PolicyDetector, PolicyPrediction, SharedPolicy},
    profile::UserProfiles,
    rate_tracker::RateTracker,
    reputation::ReputationStore,
    scorers::{BehaviorScorer, FraudScorer, LoginScorer},
};
use std::sync::Arc;

pub struct ThreatPipeline {
    encoder: FeatureEncoder,
    detectors: Vec<Box<dyn Detector>>,
    profiles: Arc<UserProfiles>,
    reputation: Arc<ReputationStore>,
    policy: Arc<SharedPolicy>,
    inference_env: EnvSnapshot,
    executor: ActionExecutor,
}

impl ThreatPipeline {
    /// An empty pipeline. Prefer `build` outside of tests.
    pub fn new(
        config: &ThreatConfig,
        reputation: Arc<ReputationStore>,
        policy: Arc<SharedPolicy>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            encoder: FeatureEncoder::new(config.encoder.clone()),
            detectors: Vec::new(),
            profiles: Arc::new(UserProfiles::new(&config.scorers)),
            executor: ActionExecutor::new(Arc::clone(&reputation), alerts),
            reputation,
            policy,
            inference_env: EnvSnapshot {
                detection_rate: config.policy.inference_detection_rate,
                false_positive_rate: config.policy.inference_false_positive_rate,
                satisfaction: config.policy.inference_satisfaction,
            },
        }
    }

    /// Build a fully wired pipeline with every detector registered.
    pub fn build(
        config: &ThreatConfig,
        reputation: Arc<ReputationStore>,
        policy: Arc<SharedPolicy>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let mut pipeline = Self::new(config, reputation, Arc::clone(&policy), alerts);
        let profiles = Arc::clone(&pipeline.profiles);
        let bias = config.scorers.suspicious_user_bias;

        // DETECTOR ORDER: fixed, documented, never reordered.
        pipeline.register(Box::new(PatternMatcher::new(config.patterns.clone())));
        pipeline.register(Box::new(RateTracker::new(config.rate.clone())));
        pipeline.register(Box::new(LoginScorer::new(
            config.scorers.login.clone(),
            bias,
            Arc::clone(&profiles),
        )));
        pipeline.register(Box::new(FraudScorer::new(
            config.scorers.fraud.clone(),
            bias,
            Arc::clone(&profiles),
        )));
        pipeline.register(Box::new(BehaviorScorer::new(
            config.scorers.behavior.clone(),
            bias,
            profiles,
        )));
        pipeline.register(Box::new(PolicyDetector::new(
            policy,
            FeatureEncoder::new(config.encoder.clone()),
            config.policy.clone(),
            (config.scorers.fraud.structuring_floor, config.scorers.fraud.amount_threshold),
        )));
        pipeline
    }

    /// Register a detector. Call in the documented order.
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        log::debug!("Registered detector {}", detector.name());
        self.detectors.push(detector);
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn reputation(&self) -> &Arc<ReputationStore> {
        &self.reputation
    }

    pub fn policy(&self) -> &Arc<SharedPolicy> {
        &self.policy
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    pub fn profiles(&self) -> &Arc<UserProfiles> {
        &self.profiles
    }

    /// Run every detector and pick the winner. No reputation side effects.
    pub fn classify(&self, entry: &LogEntry) -> Option<SecurityEvent> {
        let features = self.encoder.encode(entry);
        let ctx = DetectionContext::new(entry, &self.reputation);
        let candidates: Vec<SecurityEvent> = self
            .detectors
            .iter()
            .filter_map(|d| d.detect(&features, &ctx))
            .collect();
        if !candidates.is_empty() {
            log::debug!(
                "{} candidate(s) for {} from {}",
                candidates.len(),
                entry.endpoint,
                entry.source_ip
            );
        }
        self.profiles.observe(entry);
        aggregator::select(candidates)
    }

    /// Classify and act. The returned event carries its action label.
    pub fn process(&self, entry: &LogEntry) -> Option<SecurityEvent> {
        self.classify(entry).map(|event| self.executor.apply(event))
    }

    /// The learned policy's view of a record, at the inference snapshot.
    pub fn predict(&self, entry: &LogEntry) -> PolicyPrediction {
        self.policy
            .snapshot()
            .predict(&self.encoder, entry, &self.inference_env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{ActionTaken, AttackCategory},
        executor::LogAlertSink,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn pipeline() -> ThreatPipeline {
        ThreatPipeline::build(
            &ThreatConfig::default_test(),
            Arc::new(ReputationStore::new()),
            Arc::new(SharedPolicy::default()),
            Arc::new(LogAlertSink),
        )
    }

    #[test]
    fn detectors_register_in_documented_order() {
        assert_eq!(
            pipeline().detector_names(),
            vec![
                "pattern_matcher",
                "rate_tracker",
                "login_anomaly",
                "transaction_fraud",
                "behavioral_deviation",
                "decision_policy"
            ]
        );
    }

    #[test]
    fn injection_blocks_the_source() {
        let p = pipeline();
        let entry = LogEntry::at(Utc::now(), "203.0.113.5")
            .with_endpoint("GET", "/api/accounts")
            .with_payload("id=1' UNION SELECT * FROM users --");
        let event = p.process(&entry).unwrap();
        assert_eq!(event.category, AttackCategory::InjectionAttack);
        assert_eq!(event.action_taken, ActionTaken::Blocked);
        assert!(p.reputation().is_blocked("203.0.113.5"));
    }

    #[test]
    fn benign_traffic_passes_silently() {
        let p = pipeline();
        let t0 = Utc.with_ymd_and_hms(2024, 12, 28, 12, 0, 0).unwrap();
        for i in 0..20 {
            let entry = LogEntry::at(t0 + Duration::seconds(i * 5), "198.51.100.7")
                .with_user("alice")
                .with_endpoint("GET", "/api/accounts/balance");
            assert!(p.process(&entry).is_none());
        }
        assert_eq!(p.reputation().blocked_count(), 0);
    }

    #[test]
    fn unseen_policy_state_predicts_allow() {
        let p = pipeline();
        let entry = LogEntry::at(Utc::now(), "x").with_amount(100.0);
        let prediction = p.predict(&entry);
        assert_eq!(prediction.action, crate::policy::Action::Allow);
        assert!(!prediction.state_known);
    }
}
