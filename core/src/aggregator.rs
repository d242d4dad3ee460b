//! Picks the single event a log entry resolves to.
//!
//! Selection: highest confidence; ties go to the higher severity
//! (CRITICAL > HIGH > MEDIUM > LOW); remaining ties keep the candidate
//! produced first, i.e. by the earlier-registered detector.

use crate::event::SecurityEvent;
use std::cmp::Ordering;

/// True when `challenger` should replace `current`.
fn outranks(challenger: &SecurityEvent, current: &SecurityEvent) -> bool {
    match challenger.confidence.total_cmp(&current.confidence) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => challenger.severity > current.severity,
    }
}

pub fn select(candidates: Vec<SecurityEvent>) -> Option<SecurityEvent> {
    let mut best: Option<SecurityEvent> = None;
    for candidate in candidates {
        match &best {
            Some(current) if !outranks(&candidate, current) => {}
            _ => best = Some(candidate),
        }
    }
    best
}
