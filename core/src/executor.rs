//! Action executor: turns a winning event into side effects.
//!
//! Two halves, so detection workers never wait on the database:
//!   - ActionExecutor::apply: reputation updates, alerts and the action
//!     label. Cheap; runs on the worker that classified the entry.
//!   - Persister: appends to the EventSink with bounded retry. Owned by a
//!     single thread. Events that exhaust their retries wait in a bounded
//!     pending queue until `resubmit_pending`.
//!
//! Severity → action:
//!   HIGH, CRITICAL → block source, flag user, raise alert, BLOCKED
//!   MEDIUM         → FLAGGED
//!   LOW            → LOGGED

use crate::{
    config::ExecutorConfig,
    error::{ThreatError, ThreatResult},
    event::{ActionTaken, SecurityEvent, Severity},
    reputation::ReputationStore,
    store::{AppendAck, EventStore},
};
use serde::Serialize;
use std::{collections::VecDeque, sync::Arc, time::Duration};

// ── Alerts ────────────────────────────────────────────────────────

/// Where high-severity alerts go.
pub trait AlertSink: Send + Sync {
    fn raise(&self, event: &SecurityEvent) -> ThreatResult<()>;
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    alert_id: String,
    timestamp: String,
    attack_type: &'static str,
    threat_level: &'static str,
    source_ip: &'a str,
    user_id: Option<&'a str>,
    description: &'a str,
    confidence_score: f64,
    detector: &'a str,
}

/// Writes each alert as a JSON line at error level.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, event: &SecurityEvent) -> ThreatResult<()> {
        let payload = AlertPayload {
            alert_id: uuid::Uuid::new_v4().to_string(),
            timestamp: event.timestamp.to_rfc3339(),
            attack_type: event.category.as_str(),
            threat_level: event.severity.as_str(),
            source_ip: &event.source_ip,
            user_id: event.user_id.as_deref(),
            description: &event.description,
            confidence_score: event.confidence,
            detector: &event.detector,
        };
        log::error!("SECURITY ALERT: {}", serde_json::to_string(&payload)?);
        Ok(())
    }
}

// ── Apply ─────────────────────────────────────────────────────────

pub struct ActionExecutor {
    reputation: Arc<ReputationStore>,
    alerts: Arc<dyn AlertSink>,
}

impl ActionExecutor {
    pub fn new(reputation: Arc<ReputationStore>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { reputation, alerts }
    }

    pub fn action_for(severity: Severity) -> ActionTaken {
        match severity {
            Severity::High | Severity::Critical => ActionTaken::Blocked,
            Severity::Medium => ActionTaken::Flagged,
            Severity::Low => ActionTaken::Logged,
        }
    }

    /// Apply reputation side effects and label the event.
    /// An alert sink failure is logged; it never loses the event.
    pub fn apply(&self, mut event: SecurityEvent) -> SecurityEvent {
        event.action_taken = Self::action_for(event.severity);
        if event.action_taken != ActionTaken::Blocked {
            log::info!(
                "{} {} from {} ({:.2})",
                event.action_taken.as_str(),
                event.category,
                event.source_ip,
                event.confidence
            );
            return event;
        }

        if self.reputation.block(&event.source_ip) {
            log::warn!("BLOCKED source: {} - {}", event.source_ip, event.description);
        }
        if let Some(user) = event.user_id.as_deref() {
            if self.reputation.flag(user) {
                log::warn!("FLAGGED user: {} - {}", user, event.description);
            }
        }
        if let Err(e) = self.alerts.raise(&event) {
            log::warn!("Alert sink failed for {}: {e}", event.idempotency_key());
        }
        event
    }
}

// ── Persist ───────────────────────────────────────────────────────

/// Durable destination for events. Duplicates must be acknowledged
/// with `inserted: false`, not rejected.
pub trait EventSink: Send {
    fn append(&mut self, event: &SecurityEvent) -> ThreatResult<AppendAck>;
}

impl EventSink for EventStore {
    fn append(&mut self, event: &SecurityEvent) -> ThreatResult<AppendAck> {
        EventStore::append(self, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    Duplicate,
    Queued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub inserted: u64,
    pub duplicates: u64,
    pub queued: u64,
    /// Pending events discarded because the queue was full.
    pub dropped: u64,
}

pub struct Persister<S: EventSink> {
    sink: S,
    config: ExecutorConfig,
    pending: VecDeque<SecurityEvent>,
    stats: PersistStats,
}

impl<S: EventSink> Persister<S> {
    pub fn new(sink: S, config: ExecutorConfig) -> Self {
        Self {
            sink,
            config,
            pending: VecDeque::new(),
            stats: PersistStats::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn stats(&self) -> PersistStats {
        self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn append_with_retry(&mut self, event: &SecurityEvent) -> ThreatResult<AppendAck> {
        let attempts = self.config.max_append_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.sink.append(event) {
                Ok(ack) => return Ok(ack),
                Err(e) => {
                    log::debug!("Append attempt {attempt}/{attempts} failed: {e}");
                    last_error = e.to_string();
                    if attempt < attempts && self.config.retry_backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(
                            self.config.retry_backoff_ms * u64::from(attempt),
                        ));
                    }
                }
            }
        }
        Err(ThreatError::StoreUnavailable {
            attempts,
            reason: last_error,
        })
    }

    fn record(&mut self, ack: AppendAck) -> PersistOutcome {
        if ack.inserted {
            self.stats.inserted += 1;
            PersistOutcome::Inserted
        } else {
            self.stats.duplicates += 1;
            PersistOutcome::Duplicate
        }
    }

    /// Append with retry; on persistent failure keep the event for later.
    ///
    /// The pending queue holds at most `max_pending` events. When it is
    /// full the oldest pending event is discarded for good: it is logged,
    /// counted in `PersistStats::dropped`, and never resubmitted. This is
    /// the only path on which an acted-on event is lost.
    pub fn persist(&mut self, event: SecurityEvent) -> PersistOutcome {
        match self.append_with_retry(&event) {
            Ok(ack) => self.record(ack),
            Err(e) => {
                log::warn!("Event {} not persisted, queued: {e}", event.idempotency_key());
                if self.pending.len() >= self.config.max_pending.max(1) {
                    if let Some(lost) = self.pending.pop_front() {
                        self.stats.dropped += 1;
                        log::warn!("Pending queue full; dropped event {}", lost.idempotency_key());
                    }
                }
                self.pending.push_back(event);
                self.stats.queued += 1;
                PersistOutcome::Queued
            }
        }
    }

    /// Retry every pending event once, in arrival order. Stops at the first
    /// failure so order is kept. Returns how many left the queue.
    pub fn resubmit_pending(&mut self) -> usize {
        let mut drained = 0;
        while let Some(event) = self.pending.pop_front() {
            match self.append_with_retry(&event) {
                Ok(ack) => {
                    self.record(ack);
                    drained += 1;
                }
                Err(e) => {
                    log::warn!("Resubmission failed, {} still pending: {e}", self.pending.len() + 1);
                    self.pending.push_front(event);
                    break;
                }
            }
        }
        drained
    }
}
