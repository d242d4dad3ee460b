//! threatdesk-runner: headless driver for the threat detection pipeline.
//!
//! Usage:
//!   threatdesk-runner --seed 42 --episodes 500 --policy-out policy.json
//!   threatdesk-runner --policy-in policy.json --db events.db --logs access.json
//!   threatdesk-runner --episodes 200 --logs a.jsonl --logs b.json --workers 8

use anyhow::Result;
use chrono::{Duration, Utc};
use std::env;
use std::path::Path;
use std::sync::{atomic::AtomicBool, Arc};
use threatdesk_core::{
    config::ThreatConfig,
    dashboard::{DashboardAggregator, DashboardSummary},
    executor::LogAlertSink,
    ingest::{IngestReport, IngestService},
    log_entry::{parse_log_file, LogEntry},
    pipeline::ThreatPipeline,
    policy::{QTable, SharedPolicy},
    reputation::ReputationStore,
    store::EventStore,
    trainer::{Trainer, TrainingSummary},
};

#[derive(serde::Serialize)]
struct RunReport {
    seed: u64,
    policy_states: usize,
    policy_version: u64,
    training: Option<TrainingSummary>,
    entries: usize,
    skipped: usize,
    ingest: Option<IngestReport>,
    dashboard: DashboardSummary,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let policy_in = string_arg(&args, "--policy-in");
    let policy_out = string_arg(&args, "--policy-out");
    let log_paths: Vec<&str> = args
        .windows(2)
        .filter(|w| w[0] == "--logs")
        .map(|w| w[1].as_str())
        .collect();

    let mut config = ThreatConfig::load(data_dir)?;
    let episodes = parse_arg(&args, "--episodes", config.training.episodes);
    config.ingest.workers = parse_arg(&args, "--workers", config.ingest.workers);

    println!("ThreatDesk runner");
    println!("  seed:      {seed}");
    println!("  episodes:  {episodes}");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!("  logs:      {}", log_paths.len());
    println!();

    // ── Policy ────────────────────────────────────────────────────
    let shared = Arc::new(SharedPolicy::default());
    let mut training = None;
    let mut table = match policy_in {
        Some(path) => {
            let table = QTable::load_json(Path::new(path), config.policy.max_states)?;
            log::info!("Loaded policy with {} states from {path}", table.len());
            table
        }
        None => QTable::new(config.policy.max_states),
    };
    if episodes > 0 {
        let mut trainer = Trainer::new(&config, seed)
            .with_table(table)
            .with_shared(Arc::clone(&shared));
        training = Some(trainer.train(episodes, &AtomicBool::new(false)));
        table = trainer.into_table();
    }
    if let Some(path) = policy_out {
        table.save_json(Path::new(path))?;
        log::info!("Saved policy to {path}");
    }
    let policy_states = table.len();
    shared.publish(table);

    // ── Replay ────────────────────────────────────────────────────
    let store = if db == ":memory:" {
        let store = EventStore::in_memory()?;
        store.migrate()?;
        store
    } else {
        EventStore::open_migrated(db)?
    };
    let reputation = Arc::new(ReputationStore::new());
    let (blocked, suspicious) = store.load_reputation(&reputation)?;
    log::info!("Restored {blocked} blocked sources, {suspicious} suspicious users");

    let mut entries: Vec<LogEntry> = Vec::new();
    let mut skipped = 0;
    for path in &log_paths {
        let report = parse_log_file(Path::new(path))?;
        log::info!("{path}: {} entries, {} skipped", report.entries.len(), report.skipped);
        skipped += report.skipped;
        entries.extend(report.entries);
    }

    let window = entries
        .iter()
        .map(|e| e.timestamp)
        .fold(None, |acc: Option<(_, _)>, ts| match acc {
            None => Some((ts, ts)),
            Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
        });
    let entry_count = entries.len();

    let (ingest, store) = if entries.is_empty() {
        (None, store)
    } else {
        let pipeline = Arc::new(ThreatPipeline::build(
            &config,
            Arc::clone(&reputation),
            Arc::clone(&shared),
            Arc::new(LogAlertSink),
        ));
        let service = IngestService::start(pipeline, store, &config)?;
        for entry in entries {
            service.submit(entry)?;
        }
        let (report, store) = service.shutdown()?;
        (Some(report), store)
    };
    store.save_reputation(&reputation, Utc::now())?;

    // ── Dashboard ─────────────────────────────────────────────────
    let aggregator = DashboardAggregator::new(&store, &reputation);
    let dashboard = match window {
        Some((since, until)) => aggregator.summarize(since, until + Duration::seconds(1))?,
        None => aggregator.last_day(Utc::now())?,
    };

    let report = RunReport {
        seed,
        policy_states,
        policy_version: shared.version(),
        training,
        entries: entry_count,
        skipped,
        ingest,
        dashboard,
    };

    println!("=== RUN SUMMARY ===");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
