//! Structured log entries and the synchronous local sink every entry is mirrored to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::timefmt::iso_millis;

/// LogLevel classifies a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Security,
    Performance,
    UserAction,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Security,
        LogLevel::Performance,
        LogLevel::UserAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Security => "SECURITY",
            LogLevel::Performance => "PERFORMANCE",
            LogLevel::UserAction => "USER_ACTION",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let upper = input.to_uppercase();
        LogLevel::ALL
            .into_iter()
            .find(|l| l.as_str() == upper)
            .ok_or(())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LogEntry is a structured, immutable record of portal activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl LogEntry {
    pub fn session_id(&self) -> Option<&str> {
        self.context.get("sessionId").and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.context.get("userId").and_then(Value::as_str)
    }
}

/// Synchronous local destination for every recorded entry.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: &LogEntry);
}

/// Mirrors entries onto `tracing` at the closest matching level.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, entry: &LogEntry) {
        let session = entry.session_id().unwrap_or("-");
        let data = entry
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        match entry.level {
            LogLevel::Debug => {
                tracing::debug!(entry_id = %entry.id, session_id = %session, level = %entry.level, data = %data, "{}", entry.message)
            }
            LogLevel::Info | LogLevel::UserAction | LogLevel::Performance => {
                tracing::info!(entry_id = %entry.id, session_id = %session, level = %entry.level, data = %data, "{}", entry.message)
            }
            LogLevel::Warn | LogLevel::Security => {
                tracing::warn!(entry_id = %entry.id, session_id = %session, level = %entry.level, data = %data, "{}", entry.message)
            }
            LogLevel::Error => {
                tracing::error!(entry_id = %entry.id, session_id = %session, level = %entry.level, data = %data, "{}", entry.message)
            }
        }
    }
}

/// Discards everything; for callers that want persistence without console noise.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _entry: &LogEntry) {}
}
