//! File-backed store behavior across connections.

use chrono::{TimeZone, Utc};
use threatdesk_core::{
    event::{AttackCategory, SecurityEvent, Severity},
    log_entry::LogEntry,
    reputation::ReputationStore,
    store::EventStore,
};

fn event(source: &str, category: AttackCategory) -> SecurityEvent {
    let ts = Utc.with_ymd_and_hms(2024, 12, 28, 14, 30, 0).unwrap();
    let entry = LogEntry::at(ts, source).with_user("erin");
    SecurityEvent::detected(&entry, category, Severity::High, 0.9, "test", "seeded".into())
}

#[test]
fn appends_are_idempotent_across_connections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.db");
    let path = path.to_str().expect("utf-8 path");

    let first = EventStore::open_migrated(path).expect("open");
    let ev = event("10.1.1.1", AttackCategory::BruteForce);
    assert!(first.append(&ev).expect("append").inserted);

    let second = first.reopen().expect("reopen");
    assert!(!second.append(&ev).expect("re-append").inserted, "same key must be ignored");
    assert!(second
        .append(&event("10.1.1.1", AttackCategory::Ddos))
        .expect("append other category")
        .inserted);

    assert_eq!(first.event_count().expect("count"), 2);
    let recent = second.recent_events(10).expect("recent");
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|e| e.source_ip == "10.1.1.1"));
}

#[test]
fn reputation_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.db");
    let path = path.to_str().expect("utf-8 path");

    {
        let store = EventStore::open_migrated(path).expect("open");
        let live = ReputationStore::new();
        live.block("10.2.2.2");
        live.flag("frank");
        store.save_reputation(&live, Utc::now()).expect("save");
    }

    let store = EventStore::open_migrated(path).expect("reopen after restart");
    let restored = ReputationStore::new();
    assert_eq!(store.load_reputation(&restored).expect("load"), (1, 1));
    assert!(restored.is_blocked("10.2.2.2"));
    assert!(restored.is_suspicious("frank"));
}
