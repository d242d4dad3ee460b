//! Training loop: the environment generates, the policy learns.
//!
//! RULES:
//!   - The trainer owns the only mutable QTable. Live readers see it only
//!     through SharedPolicy::publish.
//!   - A stop request is honored between episodes, never mid-episode.
//!   - Same seed + same config ⇒ same history and same table.

use crate::{
    config::{Exploration, PolicyConfig, ThreatConfig, TrainingConfig},
    environment::BankingEnvironment,
    error::{ThreatError, ThreatResult},
    features::{FeatureEncoder, StateKey},
    policy::{Action, QTable, SharedPolicy},
    rng::{RngBank, StreamRng, StreamSlot},
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

/// Episodes averaged by the training summary.
pub const SUMMARY_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: u32,
    pub steps: u32,
    pub total_reward: f64,
    pub detected: u32,
    pub false_positives: u32,
    pub missed: u32,
    pub detection_rate: f64,
    pub satisfaction: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub average_reward: f64,
    pub average_detection_rate: f64,
    pub average_false_positives: f64,
    pub average_satisfaction: f64,
    pub states: usize,
    pub epsilon: f64,
}

pub struct Trainer {
    encoder: FeatureEncoder,
    policy_config: PolicyConfig,
    training_config: TrainingConfig,
    env: BankingEnvironment,
    explore_rng: StreamRng,
    table: QTable,
    epsilon: f64,
    history: Vec<EpisodeSummary>,
    shared: Option<Arc<SharedPolicy>>,
}

impl Trainer {
    pub fn new(config: &ThreatConfig, seed: u64) -> Self {
        let bank = RngBank::new(seed);
        Self {
            encoder: FeatureEncoder::new(config.encoder.clone()),
            policy_config: config.policy.clone(),
            training_config: config.training.clone(),
            env: BankingEnvironment::new(config.environment.clone(), bank.for_slot(StreamSlot::Environment)),
            explore_rng: bank.for_slot(StreamSlot::Exploration),
            table: QTable::new(config.policy.max_states),
            epsilon: config.policy.epsilon,
            history: Vec::new(),
            shared: None,
        }
    }

    /// Continue from a previously trained table.
    pub fn with_table(mut self, table: QTable) -> Self {
        self.table = table;
        self
    }

    /// Publish to `shared` every `publish_every` episodes and at the end of training.
    pub fn with_shared(mut self, shared: Arc<SharedPolicy>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn into_table(self) -> QTable {
        self.table
    }

    pub fn history(&self) -> &[EpisodeSummary] {
        &self.history
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn choose(&mut self, state: &StateKey) -> Action {
        match self.policy_config.exploration {
            Exploration::Boltzmann { temperature } => {
                self.table.choose_boltzmann(state, temperature, &mut self.explore_rng)
            }
            Exploration::EpsilonGreedy => {
                self.table
                    .choose_epsilon_greedy(state, self.epsilon, &mut self.explore_rng)
            }
        }
    }

    /// Play one full episode, learning after every step.
    pub fn run_episode(&mut self) -> EpisodeSummary {
        let lr = self.policy_config.learning_rate;
        let gamma = self.policy_config.discount;

        let mut snapshot = self.env.reset();
        let mut txn = self.env.next_transaction();
        let mut total_reward = 0.0;

        loop {
            let state = self.encoder.state_key(&self.encoder.encode(&txn), &snapshot);
            let action = self.choose(&state);
            let transition = self.env.apply(action, &txn);
            total_reward += transition.reward;

            if transition.done {
                self.table.update(state, action, transition.reward, None, lr, gamma);
                break;
            }

            let next_txn = self.env.next_transaction();
            let next_snapshot = transition.next.snapshot();
            let next_state = self
                .encoder
                .state_key(&self.encoder.encode(&next_txn), &next_snapshot);
            self.table
                .update(state, action, transition.reward, Some(&next_state), lr, gamma);

            txn = next_txn;
            snapshot = next_snapshot;
        }

        let stats = *self.env.stats();
        let summary = EpisodeSummary {
            episode: self.history.len() as u32,
            steps: stats.step,
            total_reward,
            detected: stats.detected,
            false_positives: stats.false_positives,
            missed: stats.missed,
            detection_rate: stats.detection_rate(),
            satisfaction: stats.satisfaction,
            epsilon: self.epsilon,
        };
        self.epsilon = (self.epsilon * self.policy_config.epsilon_decay).max(self.policy_config.epsilon_floor);
        self.history.push(summary.clone());
        summary
    }

    /// Run up to `episodes` episodes, checking `stop` before each one.
    pub fn train(&mut self, episodes: u32, stop: &AtomicBool) -> TrainingSummary {
        let log_every = self.training_config.log_every.max(1);
        let publish_every = self.training_config.publish_every.max(1);
        log::info!("Training for {episodes} episodes");

        for i in 1..=episodes {
            if stop.load(Ordering::SeqCst) {
                log::info!("Training stopped after {} episodes", i - 1);
                break;
            }
            let ep = self.run_episode();
            if ep.episode % log_every == 0 {
                log::info!(
                    "Episode {}: reward={:.2} detection_rate={:.3} satisfaction={:.1}",
                    ep.episode,
                    ep.total_reward,
                    ep.detection_rate,
                    ep.satisfaction
                );
            }
            if i % publish_every == 0 {
                self.publish();
            }
        }
        self.publish();

        let summary = self.summary();
        log::info!(
            "Training done: avg reward {:.2} over last {} episodes, {} states",
            summary.average_reward,
            summary.episodes.min(SUMMARY_WINDOW),
            summary.states
        );
        summary
    }

    /// Push a copy of the working table to live readers.
    pub fn publish(&self) -> Option<u64> {
        self.shared
            .as_ref()
            .map(|shared| shared.publish(self.table.clone()))
    }

    /// Averages over the most recent episodes.
    pub fn summary(&self) -> TrainingSummary {
        let recent = &self.history[self.history.len().saturating_sub(SUMMARY_WINDOW)..];
        let n = recent.len().max(1) as f64;
        let avg = |f: fn(&EpisodeSummary) -> f64| recent.iter().map(f).sum::<f64>() / n;
        TrainingSummary {
            episodes: self.history.len(),
            average_reward: avg(|e| e.total_reward),
            average_detection_rate: avg(|e| e.detection_rate),
            average_false_positives: avg(|e| f64::from(e.false_positives)),
            average_satisfaction: avg(|e| e.satisfaction),
            states: self.table.len(),
            epsilon: self.epsilon,
        }
    }
}

// ── Background training ───────────────────────────────────────────

/// A trainer running on its own thread.
pub struct TrainingHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<Trainer>,
}

impl TrainingHandle {
    pub fn spawn(mut trainer: Trainer, episodes: u32) -> ThreatResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("policy-trainer".into())
            .spawn(move || {
                trainer.train(episodes, &flag);
                trainer
            })?;
        Ok(Self { stop, join })
    }

    /// Ask the trainer to stop after the current episode.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the trainer and take it back.
    pub fn join(self) -> ThreatResult<Trainer> {
        self.join.join().map_err(|_| ThreatError::WorkerPanicked {
            name: "policy-trainer".into(),
        })
    }

    pub fn stop(self) -> ThreatResult<Trainer> {
        self.request_stop();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config() -> ThreatConfig {
        let mut cfg = ThreatConfig::default_test();
        cfg.environment.episode_length = 50;
        cfg
    }

    #[test]
    fn epsilon_decays_to_floor() {
        let mut cfg = short_config();
        cfg.environment.episode_length = 1;
        let mut trainer = Trainer::new(&cfg, 1);
        for _ in 0..2_000 {
            trainer.run_episode();
        }
        assert_eq!(trainer.epsilon(), 0.01);
    }

    #[test]
    fn episode_summary_counts_every_step() {
        let mut trainer = Trainer::new(&short_config(), 11);
        let ep = trainer.run_episode();
        assert_eq!(ep.steps, 50);
        assert!(!trainer.table().is_empty());
        assert_eq!(trainer.history().len(), 1);
    }

    #[test]
    fn stop_flag_is_checked_before_each_episode() {
        let mut trainer = Trainer::new(&short_config(), 2);
        let stop = AtomicBool::new(true);
        let summary = trainer.train(10, &stop);
        assert_eq!(summary.episodes, 0);
    }

    #[test]
    fn publishes_to_shared_policy() {
        let shared = Arc::new(SharedPolicy::default());
        let mut cfg = short_config();
        cfg.training.publish_every = 2;
        let mut trainer = Trainer::new(&cfg, 3).with_shared(Arc::clone(&shared));
        trainer.train(4, &AtomicBool::new(false));
        // Two periodic publishes plus the final one.
        assert_eq!(shared.version(), 3);
        assert_eq!(shared.snapshot().len(), trainer.table().len());
    }
}
