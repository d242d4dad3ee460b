use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Feature encoder ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Amounts are divided by this cap and clamped to [0, 1].
    pub amount_cap: f64,
    /// Location label → risk score.
    pub location_risk: HashMap<String, f64>,
    /// Risk used when the location is present but not in the table.
    pub unlisted_location_risk: f64,
    /// Label assumed when the record carries no location.
    pub missing_location: String,
    pub device_known_score: f64,
    pub device_unusual_score: f64,
    pub flag_true_score: f64,
    pub flag_false_score: f64,
    pub buckets: BucketConfig,
}

/// Bucket counts per StateKey dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub amount: u8,
    pub hour: u8,
    pub location: u8,
    pub device: u8,
    pub velocity: u8,
    pub anomaly: u8,
    pub env_ratio: u8,
}

// ── Pattern matcher ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    pub injection_confidence: f64,
    pub script_confidence: f64,
    pub takeover_confidence: f64,
    pub api_abuse_confidence: f64,
}

// ── Rate tracker ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    pub request_window_secs: i64,
    /// An event fires once the post-prune count exceeds this.
    pub request_threshold: usize,
    pub request_confidence: f64,
    pub failed_login_window_secs: i64,
    pub failed_login_threshold: usize,
    pub failed_login_confidence: f64,
    /// Threshold multiplier applied to sources already blocked.
    pub blocked_source_factor: f64,
    /// Upper bound on tracked sources before eviction kicks in.
    pub max_sources: usize,
    pub shards: usize,
}

// ── Anomaly scorers ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginScorerConfig {
    pub failed_attempts_threshold: u32,
    pub failures_weight: f64,
    pub location_weight: f64,
    pub unusual_hour_weight: f64,
    pub device_weight: f64,
    /// Hours strictly before this are unusual.
    pub quiet_hours_start: u32,
    /// Hours strictly after this are unusual.
    pub quiet_hours_end: u32,
    pub activation: f64,
    pub high_band: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudScorerConfig {
    pub amount_threshold: f64,
    pub amount_weight: f64,
    pub velocity_window_secs: i64,
    pub velocity_threshold: usize,
    pub velocity_weight: f64,
    pub off_hours_weight: f64,
    pub off_hours_start: u32,
    pub off_hours_end: u32,
    pub location_risk_threshold: f64,
    pub location_weight: f64,
    /// Lower bound of the structuring band; upper bound is `amount_threshold`.
    pub structuring_floor: f64,
    pub activation: f64,
    pub critical_band: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorScorerConfig {
    pub pattern_deviation_threshold: f64,
    pub pattern_weight: f64,
    pub access_change_threshold: f64,
    pub access_weight: f64,
    pub device_change_weight: f64,
    pub activation: f64,
    pub high_band: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub login: LoginScorerConfig,
    pub fraud: FraudScorerConfig,
    pub behavior: BehaviorScorerConfig,
    /// Weight added when the user is already on the suspicious list.
    pub suspicious_user_bias: f64,
    /// Failed logins older than this no longer count toward the login score.
    pub failure_memory_secs: i64,
    /// Per-user cap on remembered locations, devices, sources and amounts.
    pub baseline_capacity: usize,
    pub max_profiles: usize,
    pub shards: usize,
}

// ── Simulated environment ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub threat_probability: f64,
    pub episode_length: u32,
    pub initial_satisfaction: f64,
}

// ── Decision policy ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exploration {
    Boltzmann { temperature: f64 },
    EpsilonGreedy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub learning_rate: f64,
    pub discount: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub epsilon_floor: f64,
    pub exploration: Exploration,
    /// None keeps every state ever seen.
    pub max_states: Option<usize>,
    /// Environment snapshot assumed at inference time.
    pub inference_detection_rate: f64,
    pub inference_false_positive_rate: f64,
    pub inference_satisfaction: f64,
    /// Live reclassification only fires at or above this confidence.
    pub reclassify_min_confidence: f64,
    pub reclassify_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub episodes: u32,
    /// Publish the working table to live readers every N episodes.
    pub publish_every: u32,
    pub log_every: u32,
}

// ── Action executor ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub max_append_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatConfig {
    pub encoder: EncoderConfig,
    pub patterns: PatternConfig,
    pub rate: RateConfig,
    pub scorers: ScorerConfig,
    pub environment: EnvironmentConfig,
    pub policy: PolicyConfig,
    pub training: TrainingConfig,
    pub executor: ExecutorConfig,
    pub ingest: IngestConfig,
}

impl ThreatConfig {
    /// Load from the data/ directory.
    /// In tests, use ThreatConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/threat_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: ThreatConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let location_risk = [
            ("home", 0.1),
            ("work", 0.2),
            ("mall", 0.3),
            ("unknown", 0.7),
            ("foreign", 0.9),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            encoder: EncoderConfig {
                amount_cap: 10_000.0,
                location_risk,
                unlisted_location_risk: 0.5,
                missing_location: "unknown".into(),
                device_known_score: 0.1,
                device_unusual_score: 0.8,
                flag_true_score: 1.0,
                flag_false_score: 0.1,
                buckets: BucketConfig {
                    amount: 10,
                    hour: 4,
                    location: 5,
                    device: 2,
                    velocity: 2,
                    anomaly: 2,
                    env_ratio: 10,
                },
            },
            patterns: PatternConfig {
                injection_confidence: 0.85,
                script_confidence: 0.80,
                takeover_confidence: 0.75,
                api_abuse_confidence: 0.70,
            },
            rate: RateConfig {
                request_window_secs: 60,
                request_threshold: 100,
                request_confidence: 0.90,
                failed_login_window_secs: 300,
                failed_login_threshold: 5,
                failed_login_confidence: 0.85,
                blocked_source_factor: 0.5,
                max_sources: 10_000,
                shards: 16,
            },
            scorers: ScorerConfig {
                login: LoginScorerConfig {
                    failed_attempts_threshold: 3,
                    failures_weight: 0.4,
                    location_weight: 0.3,
                    unusual_hour_weight: 0.2,
                    device_weight: 0.3,
                    quiet_hours_start: 5,
                    quiet_hours_end: 23,
                    activation: 0.6,
                    high_band: 0.8,
                },
                fraud: FraudScorerConfig {
                    amount_threshold: 10_000.0,
                    amount_weight: 0.3,
                    velocity_window_secs: 60,
                    velocity_threshold: 5,
                    velocity_weight: 0.4,
                    off_hours_weight: 0.2,
                    off_hours_start: 6,
                    off_hours_end: 22,
                    location_risk_threshold: 0.7,
                    location_weight: 0.3,
                    structuring_floor: 9_000.0,
                    activation: 0.7,
                    critical_band: 0.9,
                },
                behavior: BehaviorScorerConfig {
                    pattern_deviation_threshold: 0.7,
                    pattern_weight: 0.4,
                    access_change_threshold: 0.6,
                    access_weight: 0.3,
                    device_change_weight: 0.2,
                    activation: 0.6,
                    high_band: 0.8,
                },
                suspicious_user_bias: 0.1,
                failure_memory_secs: 3_600,
                baseline_capacity: 16,
                max_profiles: 50_000,
                shards: 16,
            },
            environment: EnvironmentConfig {
                threat_probability: 0.2,
                episode_length: 1_000,
                initial_satisfaction: 100.0,
            },
            policy: PolicyConfig {
                learning_rate: 0.1,
                discount: 0.95,
                epsilon: 0.1,
                epsilon_decay: 0.995,
                epsilon_floor: 0.01,
                exploration: Exploration::Boltzmann { temperature: 1.0 },
                max_states: None,
                inference_detection_rate: 0.85,
                inference_false_positive_rate: 0.05,
                inference_satisfaction: 95.0,
                reclassify_min_confidence: 0.5,
                reclassify_enabled: true,
            },
            training: TrainingConfig {
                episodes: 500,
                publish_every: 50,
                log_every: 100,
            },
            executor: ExecutorConfig {
                max_append_attempts: 3,
                retry_backoff_ms: 0,
                max_pending: 10_000,
            },
            ingest: IngestConfig {
                workers: 4,
                queue_capacity: 1_024,
            },
        }
    }
}
