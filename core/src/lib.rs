//! threatdesk-core: real-time threat detection for banking traffic.
//!
//! Log entries flow through `pipeline::ThreatPipeline` (pattern, rate,
//! anomaly and learned-policy detectors), the winning event is acted on by
//! `executor`, and `ingest::IngestService` runs the whole thing across
//! worker threads. `trainer` learns the decision policy offline against a
//! simulated banking environment.

pub mod aggregator;
pub mod config;
pub mod dashboard;
pub mod detector;
pub mod environment;
pub mod error;
pub mod event;
pub mod executor;
pub mod features;
pub mod ingest;
pub mod log_entry;
pub mod pattern_matcher;
pub mod pipeline;
pub mod policy;
pub mod profile;
pub mod rate_tracker;
pub mod reputation;
pub mod rng;
pub mod scorers;
pub mod store;
pub mod trainer;
pub mod types;
