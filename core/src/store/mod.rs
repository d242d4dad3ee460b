//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Detectors and the executor call store methods; they never execute SQL.
//!
//! A connection is owned by exactly one thread. The ingest service gives
//! its store to the persister thread; everything else opens its own.

use crate::{error::ThreatResult, types::Timestamp};
use rusqlite::Connection;

mod reputation;
mod security_event;

pub use security_event::{CategoryCount, StoredEvent};

/// Result of an append: false when the idempotency key was already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendAck {
    pub inserted: bool,
}

pub struct EventStore {
    conn: Connection,
    path: Option<String>,
}

impl EventStore {
    pub fn open(path: &str) -> ThreatResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL only takes effect on real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ThreatResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, path: None })
    }

    /// Open and migrate in one call.
    pub fn open_migrated(path: &str) -> ThreatResult<Self> {
        let store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// A second connection to the same file. In-memory stores get a fresh,
    /// isolated database.
    pub fn reopen(&self) -> ThreatResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Every migration is idempotent.
    pub fn migrate(&self) -> ThreatResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_security_events.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_reputation.sql"))?;
        Ok(())
    }
}

/// Storage form for timestamps: fixed-width RFC 3339 in UTC, so text
/// comparison orders the same as time.
pub(crate) fn stored_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
