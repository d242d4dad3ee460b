//! Store methods for security events.

use crate::{
    error::ThreatResult,
    event::{ActionTaken, AttackCategory, SecurityEvent, Severity},
    types::Timestamp,
};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{stored_timestamp, AppendAck, EventStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: AttackCategory,
    pub severity: Severity,
    pub count: u64,
}

/// A persisted event as read back for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub timestamp: String,
    pub category: AttackCategory,
    pub severity: Severity,
    pub source_ip: String,
    pub user_id: Option<String>,
    pub description: String,
    pub confidence: f64,
    pub detector: String,
    pub action_taken: ActionTaken,
}

impl EventStore {
    /// Insert unless the idempotency key is already present.
    pub fn append(&self, event: &SecurityEvent) -> ThreatResult<AppendAck> {
        let factors = serde_json::to_string(&event.factors)?;
        let raw = serde_json::to_string(&event.raw)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO security_events (
                idempotency_key, timestamp, attack_type, threat_level, source_ip, user_id,
                description, confidence_score, detector, factors, raw_data, action_taken
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.idempotency_key(),
                stored_timestamp(&event.timestamp),
                event.category.as_str(),
                event.severity.as_str(),
                &event.source_ip,
                &event.user_id,
                &event.description,
                event.confidence,
                &event.detector,
                factors,
                raw,
                event.action_taken.as_str(),
            ],
        )?;
        Ok(AppendAck { inserted: changed == 1 })
    }

    /// Event counts grouped by category and severity, for events with
    /// `since <= timestamp < until`. Largest groups first.
    pub fn counts_by_category_and_severity(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> ThreatResult<Vec<CategoryCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT attack_type, threat_level, COUNT(*) FROM security_events
             WHERE timestamp >= ?1 AND timestamp < ?2
             GROUP BY attack_type, threat_level
             ORDER BY COUNT(*) DESC, attack_type ASC, threat_level ASC",
        )?;
        let rows = stmt
            .query_map(params![stored_timestamp(&since), stored_timestamp(&until)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = Vec::with_capacity(rows.len());
        for (category, severity, count) in rows {
            match (AttackCategory::from_label(&category), Severity::from_label(&severity)) {
                (Some(category), Some(severity)) => counts.push(CategoryCount {
                    category,
                    severity,
                    count: count as u64,
                }),
                _ => log::warn!("Ignoring unknown stored labels {category}/{severity}"),
            }
        }
        Ok(counts)
    }

    /// Most recent events first.
    pub fn recent_events(&self, limit: usize) -> ThreatResult<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, attack_type, threat_level, source_ip, user_id,
                    description, confidence_score, detector, action_taken
             FROM security_events
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, ts, cat, sev, src, user, desc, conf, det, act)| {
                Some(StoredEvent {
                    id,
                    timestamp: ts,
                    category: AttackCategory::from_label(&cat)?,
                    severity: Severity::from_label(&sev)?,
                    source_ip: src,
                    user_id: user,
                    description: desc,
                    confidence: conf,
                    detector: det,
                    action_taken: ActionTaken::from_label(&act)?,
                })
            })
            .collect())
    }

    // ── Test / summary helpers ────────────────────────────────────────

    pub fn event_count(&self) -> ThreatResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM security_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::LogEntry;
    use chrono::{Duration, TimeZone, Utc};

    fn store() -> EventStore {
        let store = EventStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn event(ts: Timestamp, category: AttackCategory, severity: Severity) -> SecurityEvent {
        SecurityEvent::detected(&LogEntry::at(ts, "10.0.0.1"), category, severity, 0.9, "test", "x".into())
    }

    #[test]
    fn duplicate_append_is_acknowledged_but_not_stored() {
        let s = store();
        let ts = Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap();
        let ev = event(ts, AttackCategory::Ddos, Severity::High);
        assert!(s.append(&ev).unwrap().inserted);
        assert!(!s.append(&ev).unwrap().inserted);
        assert_eq!(s.event_count().unwrap(), 1);
    }

    #[test]
    fn counts_respect_the_time_range() {
        let s = store();
        let base = Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap();
        for i in 0..3 {
            s.append(&event(base + Duration::seconds(i), AttackCategory::Ddos, Severity::High))
                .unwrap();
        }
        s.append(&event(base, AttackCategory::InjectionAttack, Severity::High))
            .unwrap();
        s.append(&event(base - Duration::days(2), AttackCategory::BruteForce, Severity::High))
            .unwrap();

        let counts = s
            .counts_by_category_and_severity(base - Duration::hours(1), base + Duration::hours(1))
            .unwrap();
        assert_eq!(
            counts,
            vec![
                CategoryCount {
                    category: AttackCategory::Ddos,
                    severity: Severity::High,
                    count: 3
                },
                CategoryCount {
                    category: AttackCategory::InjectionAttack,
                    severity: Severity::High,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn recent_events_newest_first() {
        let s = store();
        let base = Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap();
        s.append(&event(base, AttackCategory::Ddos, Severity::High)).unwrap();
        s.append(&event(base + Duration::minutes(1), AttackCategory::CrossSiteScript, Severity::High))
            .unwrap();
        let recent = s.recent_events(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].category, AttackCategory::CrossSiteScript);
    }
}
