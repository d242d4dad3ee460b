//! Parallel ingestion: worker threads classify, one thread persists.
//!
//! RULES:
//!   - An entry is routed to a worker by the hash of its source address,
//!     so entries from one source are classified in submission order.
//!   - Only the persister thread touches the EventSink.
//!   - Shutdown stops intake, drains every queue, then joins workers and
//!     the persister, in that order.

use crate::{
    config::ThreatConfig,
    error::{ThreatError, ThreatResult},
    event::{ActionTaken, SecurityEvent},
    executor::{EventSink, PersistStats, Persister},
    log_entry::LogEntry,
    pipeline::ThreatPipeline,
    types::shard_of,
};
use crossbeam::channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

/// Retry the pending queue after this many fresh events.
const RESUBMIT_EVERY: u64 = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub events: u64,
    pub blocked: u64,
    pub flagged: u64,
    pub logged: u64,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.processed += other.processed;
        self.events += other.events;
        self.blocked += other.blocked;
        self.flagged += other.flagged;
        self.logged += other.logged;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub workers: WorkerStats,
    pub persisted: PersistStats,
    /// Events still unpersisted at shutdown.
    pub pending: usize,
}

pub struct IngestService<S: EventSink + 'static> {
    senders: Vec<Sender<LogEntry>>,
    workers: Vec<JoinHandle<WorkerStats>>,
    persister: JoinHandle<Persister<S>>,
    accepting: AtomicBool,
}

impl<S: EventSink + 'static> IngestService<S> {
    pub fn start(pipeline: Arc<ThreatPipeline>, sink: S, config: &ThreatConfig) -> ThreatResult<Self> {
        let worker_count = config.ingest.workers.max(1);
        let capacity = config.ingest.queue_capacity.max(1);
        let (event_tx, event_rx) = bounded::<SecurityEvent>(capacity);

        let persister = Persister::new(sink, config.executor.clone());
        let persister = std::thread::Builder::new()
            .name("event-persister".into())
            .spawn(move || persist_loop(persister, event_rx))?;

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (tx, rx) = bounded::<LogEntry>(capacity);
            let pipeline = Arc::clone(&pipeline);
            let events = event_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ingest-worker-{i}"))
                .spawn(move || worker_loop(&pipeline, rx, events))?;
            senders.push(tx);
            workers.push(handle);
        }
        log::info!("Ingest started with {worker_count} workers");

        Ok(Self {
            senders,
            workers,
            persister,
            accepting: AtomicBool::new(true),
        })
    }

    /// Queue an entry for classification. Blocks while the worker's queue is full.
    pub fn submit(&self, entry: LogEntry) -> ThreatResult<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ThreatError::ShuttingDown);
        }
        let idx = shard_of(&entry.source_ip, self.senders.len());
        self.senders[idx]
            .send(entry)
            .map_err(|_| ThreatError::WorkerPanicked {
                name: format!("ingest-worker-{idx}"),
            })
    }

    /// Reject further submissions. Already queued entries are still processed.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Drain and join everything. Hands back the sink.
    pub fn shutdown(self) -> ThreatResult<(IngestReport, S)> {
        self.close();
        drop(self.senders);

        let mut report = IngestReport::default();
        let mut panicked = None;
        for (i, handle) in self.workers.into_iter().enumerate() {
            match handle.join() {
                Ok(stats) => report.workers.merge(stats),
                Err(_) => panicked = Some(format!("ingest-worker-{i}")),
            }
        }

        let persister = self.persister.join().map_err(|_| ThreatError::WorkerPanicked {
            name: "event-persister".into(),
        })?;
        if let Some(name) = panicked {
            return Err(ThreatError::WorkerPanicked { name });
        }

        report.persisted = persister.stats();
        report.pending = persister.pending_len();
        log::info!(
            "Ingest stopped: {} entries, {} events, {} persisted, {} pending",
            report.workers.processed,
            report.workers.events,
            report.persisted.inserted,
            report.pending
        );
        Ok((report, persister.into_sink()))
    }
}

fn worker_loop(pipeline: &ThreatPipeline, entries: Receiver<LogEntry>, events: Sender<SecurityEvent>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    for entry in entries.iter() {
        stats.processed += 1;
        let Some(event) = pipeline.process(&entry) else {
            continue;
        };
        stats.events += 1;
        match event.action_taken {
            ActionTaken::Blocked => stats.blocked += 1,
            ActionTaken::Flagged => stats.flagged += 1,
            ActionTaken::Logged => stats.logged += 1,
        }
        if events.send(event).is_err() {
            log::warn!("Persister gone; event dropped");
        }
    }
    stats
}

fn persist_loop<S: EventSink>(mut persister: Persister<S>, events: Receiver<SecurityEvent>) -> Persister<S> {
    let mut seen = 0u64;
    for event in events.iter() {
        persister.persist(event);
        seen += 1;
        if seen % RESUBMIT_EVERY == 0 && persister.pending_len() > 0 {
            persister.resubmit_pending();
        }
    }
    if persister.pending_len() > 0 {
        persister.resubmit_pending();
    }
    persister
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        executor::LogAlertSink, policy::SharedPolicy, reputation::ReputationStore, store::EventStore,
    };
    use chrono::{TimeZone, Utc};

    #[test]
    fn submit_after_close_is_rejected() {
        let cfg = ThreatConfig::default_test();
        let pipeline = Arc::new(ThreatPipeline::build(
            &cfg,
            Arc::new(ReputationStore::new()),
            Arc::new(SharedPolicy::default()),
            Arc::new(LogAlertSink),
        ));
        let store = EventStore::in_memory().unwrap();
        store.migrate().unwrap();
        let service = IngestService::start(pipeline, store, &cfg).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap();
        service.submit(LogEntry::at(ts, "1.1.1.1")).unwrap();
        service.close();
        assert!(matches!(
            service.submit(LogEntry::at(ts, "1.1.1.1")),
            Err(ThreatError::ShuttingDown)
        ));
        let (report, _) = service.shutdown().unwrap();
        assert_eq!(report.workers.processed, 1);
    }
}
