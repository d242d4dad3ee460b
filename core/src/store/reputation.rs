//! Store methods for reputation state.
//!
//! The live sets stay in ReputationStore; these tables only carry them
//! across restarts.

use crate::{error::ThreatResult, reputation::ReputationStore, types::Timestamp};
use rusqlite::params;

use super::{stored_timestamp, EventStore};

impl EventStore {
    /// Upsert every blocked source and suspicious user. Existing rows keep
    /// their original timestamp.
    pub fn save_reputation(&self, reputation: &ReputationStore, now: Timestamp) -> ThreatResult<()> {
        let at = stored_timestamp(&now);
        for source in reputation.blocked_sources() {
            self.conn.execute(
                "INSERT OR IGNORE INTO blocked_source (source_ip, blocked_at) VALUES (?1, ?2)",
                params![source, at],
            )?;
        }
        for user in reputation.suspicious_users() {
            self.conn.execute(
                "INSERT OR IGNORE INTO suspicious_user (user_id, flagged_at) VALUES (?1, ?2)",
                params![user, at],
            )?;
        }
        Ok(())
    }

    /// Load persisted reputation into `reputation`. Returns (blocked, suspicious) loaded.
    pub fn load_reputation(&self, reputation: &ReputationStore) -> ThreatResult<(usize, usize)> {
        let mut stmt = self.conn.prepare("SELECT source_ip FROM blocked_source")?;
        let sources = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut stmt = self.conn.prepare("SELECT user_id FROM suspicious_user")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        for s in &sources {
            reputation.block(s);
        }
        for u in &users {
            reputation.flag(u);
        }
        Ok((sources.len(), users.len()))
    }

    /// Drop the persisted sets; pairs with ReputationStore::reset.
    pub fn clear_reputation(&self) -> ThreatResult<()> {
        self.conn
            .execute_batch("DELETE FROM blocked_source; DELETE FROM suspicious_user;")?;
        Ok(())
    }
}
