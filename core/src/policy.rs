//! Tabular Q-learning decision policy.
//!
//! RULES:
//!   - A state with no row behaves as if every action value were 0.
//!   - Learning mutates a private working table; live inference only ever
//!     reads a published snapshot (see SharedPolicy).
//!   - Exploration randomness comes from the caller's StreamRng.
//!
//! Update rule:
//!   Q[s,a] += lr · (r + γ · max_a' Q[s',a'] − Q[s,a])
//! where a terminal or row-less s' contributes 0.

use crate::{
    config::PolicyConfig,
    detector::{DetectionContext, Detector},
    error::{ThreatError, ThreatResult},
    event::{AttackCategory, SecurityEvent, Severity},
    features::{threat_indicators, EnvSnapshot, FeatureEncoder, FeatureSource, FeatureVector, StateKey},
    rng::StreamRng,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

pub const ACTION_COUNT: usize = 3;

/// Confidence reported for a state the table has never seen.
pub const UNSEEN_CONFIDENCE: f64 = 0.5;

const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow = 0,
    Flag = 1,
    Block = 2,
}

impl Action {
    /// Index order doubles as the greedy tie-break order.
    pub const ALL: [Action; ACTION_COUNT] = [Self::Allow, Self::Flag, Self::Block];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(idx: u8) -> ThreatResult<Self> {
        Self::ALL
            .get(usize::from(idx))
            .copied()
            .ok_or(ThreatError::InvalidAction(idx))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Flag  => "flag",
            Self::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QRow {
    pub values: [f64; ACTION_COUNT],
    pub visits: [u32; ACTION_COUNT],
    /// Table clock at the last update; drives eviction.
    pub last_touched: u64,
}

impl QRow {
    pub fn max_value(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Actions updated at least once.
    pub fn explored(&self) -> usize {
        self.visits.iter().filter(|v| **v > 0).count()
    }

    /// Greedy action; ties go to the lowest index.
    pub fn greedy(&self) -> Action {
        let mut best = 0;
        for i in 1..ACTION_COUNT {
            if self.values[i] > self.values[best] {
                best = i;
            }
        }
        Action::ALL[best]
    }

    /// Value spread scaled by how many actions have been tried.
    pub fn confidence(&self) -> f64 {
        let max = self.max_value();
        let min = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        let spread = (max - min) / (max.abs() + min.abs()).max(1.0);
        let coverage = self.explored() as f64 / ACTION_COUNT as f64;
        (spread * coverage).clamp(0.0, 1.0)
    }
}

#[derive(Serialize, Deserialize)]
struct PolicyArtifact {
    version: u32,
    entries: Vec<(StateKey, QRow)>,
}

#[derive(Debug, Clone, Default)]
pub struct QTable {
    rows: HashMap<StateKey, QRow>,
    clock: u64,
    max_states: Option<usize>,
}

impl QTable {
    pub fn new(max_states: Option<usize>) -> Self {
        Self {
            rows: HashMap::new(),
            clock: 0,
            max_states,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, state: &StateKey) -> Option<&QRow> {
        self.rows.get(state)
    }

    /// Every stored row, in no particular order.
    pub fn rows(&self) -> impl Iterator<Item = (&StateKey, &QRow)> {
        self.rows.iter()
    }

    pub fn value(&self, state: &StateKey, action: Action) -> f64 {
        self.rows.get(state).map_or(0.0, |r| r.values[action.index()])
    }

    /// One Q-learning step. `next` is None for a terminal transition.
    /// Returns the updated value.
    pub fn update(
        &mut self,
        state: StateKey,
        action: Action,
        reward: f64,
        next: Option<&StateKey>,
        learning_rate: f64,
        discount: f64,
    ) -> f64 {
        // Unexplored actions sit at 0 in the row, so they take part in the max.
        let future = next
            .and_then(|s| self.rows.get(s))
            .map_or(0.0, QRow::max_value);

        self.clock += 1;
        let clock = self.clock;
        if !self.rows.contains_key(&state) {
            self.make_room();
        }
        let row = self.rows.entry(state).or_default();
        let i = action.index();
        let current = row.values[i];
        row.values[i] = current + learning_rate * (reward + discount * future - current);
        row.visits[i] = row.visits[i].saturating_add(1);
        row.last_touched = clock;
        row.values[i]
    }

    fn make_room(&mut self) {
        let Some(limit) = self.max_states else {
            return;
        };
        while self.rows.len() >= limit.max(1) {
            let victim = self
                .rows
                .iter()
                .min_by(|a, b| a.1.last_touched.cmp(&b.1.last_touched).then_with(|| a.0.cmp(b.0)))
                .map(|(k, _)| *k);
            match victim {
                Some(key) => {
                    self.rows.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Greedy decision with its confidence. Unseen state → (Allow, 0.5).
    pub fn decide(&self, state: &StateKey) -> (Action, f64) {
        match self.rows.get(state) {
            Some(row) => (row.greedy(), row.confidence()),
            None => (Action::Allow, UNSEEN_CONFIDENCE),
        }
    }

    /// Softmax over action values at `temperature`, max-shifted.
    /// Falls back to a uniform draw when the state has no row or any weight
    /// is not finite.
    pub fn choose_boltzmann(&self, state: &StateKey, temperature: f64, rng: &mut StreamRng) -> Action {
        let Some(row) = self.rows.get(state) else {
            return *rng.pick(&Action::ALL);
        };
        if !(temperature.is_finite() && temperature > 0.0) {
            return *rng.pick(&Action::ALL);
        }
        let max = row.max_value();
        let weights: Vec<f64> = row
            .values
            .iter()
            .map(|q| ((q - max) / temperature).exp())
            .collect();
        if weights.iter().any(|w| !w.is_finite()) {
            return *rng.pick(&Action::ALL);
        }
        match rng.weighted_index(&weights) {
            Some(i) => Action::ALL[i],
            None => *rng.pick(&Action::ALL),
        }
    }

    pub fn choose_epsilon_greedy(&self, state: &StateKey, epsilon: f64, rng: &mut StreamRng) -> Action {
        if rng.chance(epsilon) {
            *rng.pick(&Action::ALL)
        } else {
            self.decide(state).0
        }
    }

    /// Evaluate a record against the table at a fixed environment snapshot.
    pub fn predict<R: FeatureSource + ?Sized>(
        &self,
        encoder: &FeatureEncoder,
        record: &R,
        env: &EnvSnapshot,
    ) -> PolicyPrediction {
        let features = encoder.encode(record);
        let state = encoder.state_key(&features, env);
        let (action, confidence) = self.decide(&state);
        PolicyPrediction {
            action,
            confidence,
            risk_score: features.mean(),
            indicators: threat_indicators(record).into_iter().map(String::from).collect(),
            state_known: self.rows.contains_key(&state),
        }
    }

    // ── Persistence ───────────────────────────────────────────────

    fn to_artifact(&self) -> PolicyArtifact {
        let mut entries: Vec<(StateKey, QRow)> =
            self.rows.iter().map(|(k, v)| (*k, v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        PolicyArtifact {
            version: ARTIFACT_VERSION,
            entries,
        }
    }

    pub fn to_json(&self) -> ThreatResult<String> {
        Ok(serde_json::to_string(&self.to_artifact())?)
    }

    pub fn from_json(json: &str, max_states: Option<usize>) -> ThreatResult<Self> {
        let artifact: PolicyArtifact = serde_json::from_str(json)?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(anyhow::anyhow!(
                "Unsupported policy artifact version {} (expected {ARTIFACT_VERSION})",
                artifact.version
            )
            .into());
        }
        let clock = artifact
            .entries
            .iter()
            .map(|(_, r)| r.last_touched)
            .max()
            .unwrap_or(0);
        let mut table = Self {
            rows: artifact.entries.into_iter().collect(),
            clock,
            max_states,
        };
        if let Some(limit) = max_states {
            table.truncate_oldest(limit);
        }
        Ok(table)
    }

    fn truncate_oldest(&mut self, limit: usize) {
        let excess = self.rows.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(u64, StateKey)> =
            self.rows.iter().map(|(k, r)| (r.last_touched, *k)).collect();
        by_age.sort();
        for (_, key) in by_age.into_iter().take(excess) {
            self.rows.remove(&key);
        }
    }

    /// Write the table as JSON via a sibling temp file renamed into place.
    pub fn save_json(&self, path: &Path) -> ThreatResult<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        log::info!("Saved policy with {} states to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load_json(path: &Path, max_states: Option<usize>) -> ThreatResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let table = Self::from_json(&content, max_states)?;
        log::info!("Loaded policy with {} states from {}", table.len(), path.display());
        Ok(table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyPrediction {
    pub action: Action,
    pub confidence: f64,
    /// Mean of the feature vector.
    pub risk_score: f64,
    pub indicators: Vec<String>,
    pub state_known: bool,
}

// ── Shared snapshot ───────────────────────────────────────────────

/// Versioned read-only snapshot of the policy for live inference.
/// Readers clone the Arc and drop the lock immediately; the trainer
/// publishes a fresh copy rather than mutating in place.
#[derive(Debug)]
pub struct SharedPolicy {
    current: RwLock<Arc<QTable>>,
    version: AtomicU64,
}

impl SharedPolicy {
    pub fn new(table: QTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
            version: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<QTable> {
        Arc::clone(&self.current.read())
    }

    /// Replace the live table. Returns the new version number.
    pub fn publish(&self, table: QTable) -> u64 {
        let states = table.len();
        *self.current.write() = Arc::new(table);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Published policy v{version} ({states} states)");
        version
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl Default for SharedPolicy {
    fn default() -> Self {
        Self::new(QTable::default())
    }
}

// ── Live reclassification ─────────────────────────────────────────

/// Proposes an event when the learned policy would flag or block a
/// transaction-shaped record with enough confidence.
pub struct PolicyDetector {
    policy: Arc<SharedPolicy>,
    encoder: FeatureEncoder,
    config: PolicyConfig,
    structuring_band: (f64, f64),
}

impl PolicyDetector {
    pub fn new(
        policy: Arc<SharedPolicy>,
        encoder: FeatureEncoder,
        config: PolicyConfig,
        structuring_band: (f64, f64),
    ) -> Self {
        Self {
            policy,
            encoder,
            config,
            structuring_band,
        }
    }

    pub fn inference_snapshot(&self) -> EnvSnapshot {
        EnvSnapshot {
            detection_rate: self.config.inference_detection_rate,
            false_positive_rate: self.config.inference_false_positive_rate,
            satisfaction: self.config.inference_satisfaction,
        }
    }

    pub fn predict<R: FeatureSource + ?Sized>(&self, record: &R) -> PolicyPrediction {
        self.policy
            .snapshot()
            .predict(&self.encoder, record, &self.inference_snapshot())
    }
}

impl Detector for PolicyDetector {
    fn name(&self) -> &'static str {
        "decision_policy"
    }

    fn detect(&self, _features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent> {
        if !self.config.reclassify_enabled {
            return None;
        }
        let amount = ctx.entry.amount?;
        let prediction = self.predict(ctx.entry);
        if prediction.action == Action::Allow
            || prediction.confidence < self.config.reclassify_min_confidence
        {
            return None;
        }
        let severity = match prediction.action {
            Action::Block => Severity::High,
            _ => Severity::Medium,
        };
        let (floor, ceiling) = self.structuring_band;
        let category = if amount >= floor && amount < ceiling {
            AttackCategory::MoneyLaundering
        } else {
            AttackCategory::FraudTransaction
        };
        Some(
            SecurityEvent::detected(
                ctx.entry,
                category,
                severity,
                prediction.confidence,
                self.name(),
                format!(
                    "Learned policy recommends {} (risk {:.2})",
                    prediction.action.as_str(),
                    prediction.risk_score
                ),
            )
            .with_factors(prediction.indicators),
        )
    }
}
