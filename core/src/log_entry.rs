//! Raw log records and the framing parser that turns log files into them.
//!
//! Accepted framings, tried in this order:
//!   1. a JSON array of records
//!   2. a JSON object with a `logs` array (the daily auth-log files)
//!   3. a single JSON object
//!   4. newline-delimited JSON, one record per line
//!
//! A unit that fails to parse is skipped and counted; it never aborts the
//! stream. Every field has a default so a sparse record is still usable.

use crate::{
    error::ThreatResult,
    types::{SourceAddr, Timestamp, UserId},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Placeholder source when a record names none.
pub const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: Timestamp,
    #[serde(
        default = "unknown_source",
        alias = "clientIP",
        alias = "source_address",
        deserialize_with = "lenient_string"
    )]
    pub source_ip: SourceAddr,
    #[serde(default, alias = "userId", deserialize_with = "lenient_opt_string")]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "path", deserialize_with = "lenient_string")]
    pub endpoint: String,
    #[serde(default, alias = "requestMethod", deserialize_with = "lenient_string")]
    pub method: String,
    #[serde(default, alias = "details", deserialize_with = "lenient_string")]
    pub payload: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_opt_u16")]
    pub status_code: Option<u16>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub location: Option<String>,
    #[serde(default, alias = "device_id", deserialize_with = "lenient_opt_string")]
    pub device_fingerprint: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub success: Option<bool>,
    /// Every field not named above, including boolean indicator flags.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    /// A minimal record: everything except time and source left at defaults.
    pub fn at(timestamp: Timestamp, source_ip: impl Into<SourceAddr>) -> Self {
        Self {
            timestamp,
            source_ip: source_ip.into(),
            user_id: None,
            endpoint: String::new(),
            method: String::new(),
            payload: String::new(),
            url: String::new(),
            status_code: None,
            amount: None,
            location: None,
            device_fingerprint: None,
            event: None,
            success: None,
            extra: Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_endpoint(mut self, method: &str, endpoint: &str) -> Self {
        self.method = method.to_string();
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device_fingerprint = Some(device.to_string());
        self
    }

    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.extra.insert(name.to_string(), Value::Bool(value));
        self
    }

    /// Build from an already-parsed JSON value.
    /// Falls back to `username` when no user id is present.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut entry: LogEntry = serde_json::from_value(value)?;
        if entry.user_id.is_none() {
            if let Some(Value::String(name)) = entry.extra.get("username") {
                if !name.is_empty() && name != "unknown" {
                    entry.user_id = Some(name.clone());
                }
            }
        }
        Ok(entry)
    }

    /// Text the signature registry is evaluated against.
    pub fn inspected_text(&self) -> String {
        format!("{} {} {}", self.endpoint, self.url, self.payload)
    }

    /// Read a boolean indicator from the extra fields.
    /// Accepts `true`, `"true"`, and non-zero numbers.
    pub fn flag(&self, name: &str) -> bool {
        match self.extra.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            _ => false,
        }
    }

    pub fn is_login(&self) -> bool {
        self.endpoint.to_ascii_lowercase().contains("login")
            || self
                .event
                .as_deref()
                .is_some_and(|e| e.to_ascii_uppercase().starts_with("LOGIN"))
    }

    pub fn is_transaction(&self) -> bool {
        let endpoint = self.endpoint.to_ascii_lowercase();
        endpoint.contains("transaction") || endpoint.contains("transfer")
    }

    /// A rejected authentication attempt.
    pub fn is_failed_login(&self) -> bool {
        if !self.is_login() {
            return false;
        }
        self.success == Some(false)
            || matches!(self.status_code, Some(401) | Some(403))
            || self
                .event
                .as_deref()
                .is_some_and(|e| e.to_ascii_uppercase().contains("FAIL"))
    }

    pub fn hour(&self) -> u32 {
        use chrono::Timelike;
        self.timestamp.hour()
    }
}

// ── Framing parser ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ParseReport {
    pub entries: Vec<LogEntry>,
    pub skipped: usize,
    /// One short reason per skipped unit.
    pub errors: Vec<String>,
}

impl ParseReport {
    fn push_value(&mut self, value: Value) {
        if !value.is_object() {
            self.skip(format!("record is not an object: {}", preview(&value.to_string())));
            return;
        }
        match LogEntry::from_value(value) {
            Ok(entry) => self.entries.push(entry),
            Err(e) => self.skip(format!("invalid record: {e}")),
        }
    }

    fn skip(&mut self, reason: String) {
        log::warn!("Skipping log unit: {reason}");
        self.skipped += 1;
        self.errors.push(reason);
    }
}

/// Parse an entire log document, structured framing first.
pub fn parse_log_text(content: &str) -> ParseReport {
    let mut report = ParseReport::default();
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return report;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => {
            for item in items {
                report.push_value(item);
            }
        }
        Ok(Value::Object(mut obj)) => match obj.remove("logs") {
            Some(Value::Array(items)) => {
                for item in items {
                    report.push_value(item);
                }
            }
            Some(other) => {
                obj.insert("logs".into(), other);
                report.push_value(Value::Object(obj));
            }
            None => report.push_value(Value::Object(obj)),
        },
        Ok(other) => report.skip(format!("unsupported document: {}", preview(&other.to_string()))),
        Err(_) => {
            for line in trimmed.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => report.push_value(value),
                    Err(e) => report.skip(format!("invalid JSON line ({e}): {}", preview(line))),
                }
            }
        }
    }

    log::debug!(
        "Parsed {} log entries ({} skipped)",
        report.entries.len(),
        report.skipped
    );
    report
}

pub fn parse_log_file(path: &Path) -> ThreatResult<ParseReport> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_log_text(&content))
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

// ── Lenient field decoding ────────────────────────────────────────

fn unknown_source() -> SourceAddr {
    UNKNOWN_SOURCE.to_string()
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(value_to_string(Value::deserialize(de)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(value_to_string(Value::deserialize(de)?).filter(|s| !s.is_empty()))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

fn lenient_opt_u16<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u16>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    })
}

/// Same truthiness as `LogEntry::flag`; anything unrecognized is None.
fn lenient_opt_bool<'de, D: Deserializer<'de>>(de: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// RFC 3339, or a naive ISO local date-time taken as UTC.
/// Anything else falls back to the ingestion instant.
fn lenient_timestamp<'de, D: Deserializer<'de>>(de: D) -> Result<Timestamp, D::Error> {
    let raw = match Value::deserialize(de)? {
        Value::String(s) => s,
        _ => return Ok(Utc::now()),
    };
    Ok(parse_timestamp(&raw).unwrap_or_else(|| {
        log::debug!("Unparseable timestamp '{raw}', using ingestion time");
        Utc::now()
    }))
}

pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
