//! Queries and aggregate statistics over persisted log entries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::document_store::{
    collections, BatchOp, Direction, DocumentStore, FilterOp, Predicate, Query,
};
use crate::errors::{PortalError, PortalResult};
use crate::log_sink::{LogEntry, LogLevel};
use crate::timefmt;

/// Entries considered by `statistics`
pub const STATISTICS_WINDOW: usize = 1000;
const TOP_N: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogFilters {
    pub level: Option<LogLevel>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl LogFilters {
    fn to_query(&self, limit: usize) -> Query {
        let mut query = Query::new();
        if let Some(level) = self.level {
            query = query.where_eq("level", level.as_str());
        }
        if let Some(user_id) = &self.user_id {
            query = query.where_eq("context.userId", user_id.as_str());
        }
        if let Some(session_id) = &self.session_id {
            query = query.where_eq("context.sessionId", session_id.as_str());
        }
        if let Some(start) = &self.start_date {
            query = query.filter(Predicate::new("timestamp", FilterOp::Ge, timefmt::format(start)));
        }
        if let Some(end) = &self.end_date {
            query = query.filter(Predicate::new("timestamp", FilterOp::Le, timefmt::format(end)));
        }
        query.order_by("timestamp", Direction::Descending).limit(limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrequency {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowOperation {
    pub operation: String,
    pub duration: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub samples: usize,
    pub average_duration: f64,
    pub slowest_operations: Vec<SlowOperation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub total: usize,
    pub by_level: BTreeMap<String, usize>,
    pub by_hour: BTreeMap<u32, usize>,
    pub by_user: BTreeMap<String, usize>,
    pub error_rate: f64,
    pub top_errors: Vec<ErrorFrequency>,
    pub performance: PerformanceSummary,
}

/// Aggregate a window of entries. Entry order defines "first seen" for
/// breaking ties between equally frequent errors.
pub fn compute_statistics(entries: &[LogEntry]) -> LogStatistics {
    let mut stats = LogStatistics {
        total: entries.len(),
        ..Default::default()
    };

    let mut error_order: Vec<ErrorFrequency> = Vec::new();
    let mut error_index: HashMap<&str, usize> = HashMap::new();
    let mut perf: Vec<SlowOperation> = Vec::new();

    for entry in entries {
        *stats.by_level.entry(entry.level.as_str().to_string()).or_insert(0) += 1;
        *stats.by_hour.entry(entry.timestamp.hour()).or_insert(0) += 1;
        let user = entry.user_id().unwrap_or("anonymous").to_string();
        *stats.by_user.entry(user).or_insert(0) += 1;

        match entry.level {
            LogLevel::Error => match error_index.get(entry.message.as_str()) {
                Some(&i) => error_order[i].count += 1,
                None => {
                    error_index.insert(entry.message.as_str(), error_order.len());
                    error_order.push(ErrorFrequency {
                        message: entry.message.clone(),
                        count: 1,
                    });
                }
            },
            LogLevel::Performance => {
                let data = entry.data.as_ref();
                if let Some(duration) = data.and_then(|d| d.get("duration")).and_then(|d| d.as_f64()) {
                    let operation = data
                        .and_then(|d| d.get("operation"))
                        .and_then(|o| o.as_str())
                        .unwrap_or(entry.message.as_str())
                        .to_string();
                    perf.push(SlowOperation {
                        operation,
                        duration,
                        timestamp: timefmt::format(&entry.timestamp),
                    });
                }
            }
            _ => {}
        }
    }

    let errors = stats.by_level.get(LogLevel::Error.as_str()).copied().unwrap_or(0);
    stats.error_rate = if stats.total == 0 {
        0.0
    } else {
        errors as f64 / stats.total as f64
    };

    // stable sort keeps first-seen order among equal counts
    error_order.sort_by(|a, b| b.count.cmp(&a.count));
    error_order.truncate(TOP_N);
    stats.top_errors = error_order;

    if !perf.is_empty() {
        let sum: f64 = perf.iter().map(|p| p.duration).sum();
        stats.performance.samples = perf.len();
        stats.performance.average_duration = sum / perf.len() as f64;
        perf.sort_by(|a, b| b.duration.total_cmp(&a.duration));
        perf.truncate(TOP_N);
        stats.performance.slowest_operations = perf;
    }

    stats
}

/// Read-side facade over the `logs` collection
#[derive(Clone)]
pub struct LogQuery {
    store: Option<Arc<dyn DocumentStore>>,
}

impl LogQuery {
    pub fn new(store: Option<Arc<dyn DocumentStore>>) -> Self {
        Self { store }
    }

    fn store(&self) -> PortalResult<&Arc<dyn DocumentStore>> {
        self.store.as_ref().ok_or(PortalError::StorageUnavailable)
    }

    /// Matching entries, newest first, at most `limit`
    pub async fn query(&self, filters: &LogFilters, limit: usize) -> PortalResult<Vec<LogEntry>> {
        let store = self.store()?;
        let docs = store.query(collections::LOGS, &filters.to_query(limit)).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| match doc.decode::<LogEntry>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(id = %doc.id, error = %e, "Skipping malformed log entry");
                    None
                }
            })
            .collect())
    }

    pub async fn statistics(&self, filters: &LogFilters) -> PortalResult<LogStatistics> {
        let entries = self.query(filters, STATISTICS_WINDOW).await?;
        Ok(compute_statistics(&entries))
    }

    /// Delete every entry older than `days_to_keep` days in one batch
    pub async fn retention_sweep(&self, days_to_keep: u32) -> PortalResult<usize> {
        let store = self.store()?;
        let cutoff = Utc::now() - Duration::days(i64::from(days_to_keep));
        let query = Query::new().filter(Predicate::new(
            "timestamp",
            FilterOp::Lt,
            timefmt::format(&cutoff),
        ));
        let stale = store.query(collections::LOGS, &query).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let count = stale.len();
        let ops = stale
            .into_iter()
            .map(|doc| BatchOp::delete(collections::LOGS, doc.id))
            .collect();
        store.commit(ops).await?;
        tracing::info!(removed = count, days_to_keep, "Log retention sweep complete");
        Ok(count)
    }
}
