//! The concurrent ingest service: drain on shutdown, per-source ordering,
//! and persistence of every acted-on event.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use threatdesk_core::{
    config::ThreatConfig,
    dashboard::DashboardAggregator,
    event::AttackCategory,
    executor::LogAlertSink,
    ingest::IngestService,
    log_entry::LogEntry,
    pipeline::ThreatPipeline,
    policy::SharedPolicy,
    reputation::ReputationStore,
    store::EventStore,
};

fn build(reputation: &Arc<ReputationStore>) -> (ThreatConfig, Arc<ThreatPipeline>) {
    let cfg = ThreatConfig::default_test();
    let pipeline = Arc::new(ThreatPipeline::build(
        &cfg,
        Arc::clone(reputation),
        Arc::new(SharedPolicy::default()),
        Arc::new(LogAlertSink),
    ));
    (cfg, pipeline)
}

fn migrated_store() -> EventStore {
    let store = EventStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

#[test]
fn shutdown_drains_and_preserves_per_source_order() {
    let reputation = Arc::new(ReputationStore::new());
    let (cfg, pipeline) = build(&reputation);
    let service = IngestService::start(pipeline, migrated_store(), &cfg).expect("start");

    // 150 requests from one flooding source, interleaved with 30 quiet ones.
    // Only in-order processing yields exactly requests 101..=150 as events.
    let t0 = Utc.with_ymd_and_hms(2024, 12, 28, 12, 0, 0).unwrap();
    for i in 0..150 {
        let ts = t0 + Duration::milliseconds(i * 100);
        service
            .submit(LogEntry::at(ts, "198.51.100.50").with_endpoint("GET", "/api/accounts"))
            .expect("submit flood");
        if i % 5 == 0 {
            service
                .submit(LogEntry::at(ts, "198.51.100.60").with_endpoint("GET", "/api/accounts"))
                .expect("submit quiet");
        }
    }

    let (report, store) = service.shutdown().expect("shutdown");
    assert_eq!(report.workers.processed, 180, "every submitted entry must be processed");
    assert_eq!(report.workers.events, 50);
    assert_eq!(report.workers.blocked, 50);
    assert_eq!(report.persisted.inserted, 50);
    assert_eq!(report.pending, 0);
    assert_eq!(store.event_count().expect("count"), 50);

    assert!(reputation.is_blocked("198.51.100.50"));
    assert!(!reputation.is_blocked("198.51.100.60"));

    let summary = DashboardAggregator::new(&store, &reputation)
        .summarize(t0, t0 + Duration::minutes(1))
        .expect("summary");
    assert_eq!(summary.total_events, 50);
    assert_eq!(summary.top_categories, vec![(AttackCategory::Ddos, 50)]);
}

#[test]
fn replaying_the_same_log_does_not_duplicate_events() {
    let t0 = Utc.with_ymd_and_hms(2024, 12, 28, 9, 0, 0).unwrap();
    let entries: Vec<LogEntry> = (0..3)
        .map(|i| {
            LogEntry::at(t0 + Duration::seconds(i), format!("203.0.113.{i}"))
                .with_endpoint("GET", "/search")
                .with_payload("q=' UNION SELECT password FROM users")
        })
        .collect();

    let mut store = migrated_store();
    for _ in 0..2 {
        let reputation = Arc::new(ReputationStore::new());
        let (cfg, pipeline) = build(&reputation);
        let service = IngestService::start(pipeline, store, &cfg).expect("start");
        for entry in &entries {
            service.submit(entry.clone()).expect("submit");
        }
        let (_, returned) = service.shutdown().expect("shutdown");
        store = returned;
    }
    assert_eq!(store.event_count().expect("count"), 3);
}
