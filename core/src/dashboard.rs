//! Dashboard summary over a time range of stored events.

use crate::{
    error::ThreatResult,
    event::AttackCategory,
    reputation::ReputationStore,
    store::{CategoryCount, EventStore},
    types::Timestamp,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOP_CATEGORIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub since: Timestamp,
    pub until: Timestamp,
    pub counts: Vec<CategoryCount>,
    pub total_events: u64,
    pub blocked_sources: usize,
    pub suspicious_users: usize,
    /// Up to five categories, most events first.
    pub top_categories: Vec<(AttackCategory, u64)>,
}

pub struct DashboardAggregator<'a> {
    store: &'a EventStore,
    reputation: &'a ReputationStore,
}

impl<'a> DashboardAggregator<'a> {
    pub fn new(store: &'a EventStore, reputation: &'a ReputationStore) -> Self {
        Self { store, reputation }
    }

    pub fn summarize(&self, since: Timestamp, until: Timestamp) -> ThreatResult<DashboardSummary> {
        let counts = self.store.counts_by_category_and_severity(since, until)?;
        let total_events = counts.iter().map(|c| c.count).sum();

        let mut per_category: HashMap<AttackCategory, u64> = HashMap::new();
        for c in &counts {
            *per_category.entry(c.category).or_default() += c.count;
        }
        let mut top_categories: Vec<(AttackCategory, u64)> = per_category.into_iter().collect();
        top_categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_categories.truncate(TOP_CATEGORIES);

        Ok(DashboardSummary {
            since,
            until,
            counts,
            total_events,
            blocked_sources: self.reputation.blocked_count(),
            suspicious_users: self.reputation.suspicious_count(),
            top_categories,
        })
    }

    /// The trailing 24 hours ending at `now`.
    pub fn last_day(&self, now: Timestamp) -> ThreatResult<DashboardSummary> {
        self.summarize(now - Duration::hours(24), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{SecurityEvent, Severity},
        log_entry::LogEntry,
    };
    use chrono::{TimeZone, Utc};

    #[test]
    fn top_categories_merge_severities() {
        let store = EventStore::in_memory().unwrap();
        store.migrate().unwrap();
        let rep = ReputationStore::new();
        rep.block("10.0.0.1");
        let now = Utc.with_ymd_and_hms(2024, 12, 28, 12, 0, 0).unwrap();

        let push = |secs: i64, src: &str, cat, sev| {
            let entry = LogEntry::at(now - Duration::seconds(secs), src);
            store
                .append(&SecurityEvent::detected(&entry, cat, sev, 0.8, "test", String::new()))
                .unwrap();
        };
        push(1, "a", AttackCategory::SuspiciousLogin, Severity::Medium);
        push(2, "a", AttackCategory::SuspiciousLogin, Severity::High);
        push(3, "b", AttackCategory::Ddos, Severity::High);

        let summary = DashboardAggregator::new(&store, &rep).last_day(now).unwrap();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.blocked_sources, 1);
        assert_eq!(
            summary.top_categories,
            vec![(AttackCategory::SuspiciousLogin, 2), (AttackCategory::Ddos, 1)]
        );
    }
}
