//! Reputation state: blocked source addresses and suspicious users.
//!
//! RULE: Only the action executor writes here.
//! Detectors read it to bias their thresholds and scores.
//! Entries are never cleared automatically; `reset` is an operator action.

use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ReputationStore {
    blocked: RwLock<HashSet<String>>,
    suspicious: RwLock<HashSet<String>>,
}

impl ReputationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, source: &str) -> bool {
        self.blocked.read().contains(source)
    }

    pub fn is_suspicious(&self, user: &str) -> bool {
        self.suspicious.read().contains(user)
    }

    /// Returns true when the source was not already blocked.
    pub fn block(&self, source: &str) -> bool {
        if self.blocked.read().contains(source) {
            return false;
        }
        self.blocked.write().insert(source.to_string())
    }

    /// Returns true when the user was not already flagged.
    pub fn flag(&self, user: &str) -> bool {
        if self.suspicious.read().contains(user) {
            return false;
        }
        self.suspicious.write().insert(user.to_string())
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.read().len()
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious.read().len()
    }

    /// Sorted copy of the blocked set.
    pub fn blocked_sources(&self) -> Vec<String> {
        let mut out: Vec<String> = self.blocked.read().iter().cloned().collect();
        out.sort();
        out
    }

    pub fn suspicious_users(&self) -> Vec<String> {
        let mut out: Vec<String> = self.suspicious.read().iter().cloned().collect();
        out.sort();
        out
    }

    pub fn reset(&self) {
        self.blocked.write().clear();
        self.suspicious.write().clear();
        log::info!("Reputation state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_idempotent() {
        let rep = ReputationStore::new();
        assert!(rep.block("10.0.0.1"));
        assert!(!rep.block("10.0.0.1"));
        assert!(rep.is_blocked("10.0.0.1"));
        assert!(!rep.is_blocked("10.0.0.2"));
        assert_eq!(rep.blocked_count(), 1);
    }

    #[test]
    fn reset_clears_both_sets() {
        let rep = ReputationStore::new();
        rep.block("a");
        rep.flag("alice");
        assert!(rep.is_suspicious("alice"));
        rep.reset();
        assert_eq!(rep.blocked_count(), 0);
        assert_eq!(rep.suspicious_count(), 0);
    }
}
