//! Buffered event logger.
//!
//! Every recorded entry is mirrored to the local sink immediately. When
//! persistence is enabled the entry is also buffered and written to the
//! `logs` collection in batches: on a timer, when the buffer reaches capacity,
//! and once more on shutdown. Flush failures are reported to the sink and the
//! failed batch is put back at the front of the buffer; they never reach the
//! caller of `record`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config_loader::LoggerSettings;
use crate::document_store::{collections, to_document, BatchOp, DocumentStore};
use crate::errors::PortalResult;
use crate::log_sink::{LogEntry, LogLevel, LogSink};
use crate::sanitizer::sanitize;
use crate::session_context::SessionContext;

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write, or persistence disabled
    Skipped,
    /// Batch committed
    Flushed(usize),
    /// Commit failed; batch returned to the buffer
    Requeued(usize),
}

/// Buffered entries plus how many arrived since a batch was last taken.
/// Only `fresh` counts toward a capacity flush, so entries put back after a
/// failed write do not trigger another write on every record.
#[derive(Default)]
struct LogBuffer {
    entries: Vec<LogEntry>,
    fresh: usize,
}

impl LogBuffer {
    fn take(&mut self) -> Vec<LogEntry> {
        self.fresh = 0;
        std::mem::take(&mut self.entries)
    }

    /// Drop the oldest entries beyond `cap`; returns how many were dropped
    fn trim_to(&mut self, cap: usize) -> usize {
        let excess = self.entries.len().saturating_sub(cap.max(1));
        if excess > 0 {
            self.entries.drain(..excess);
        }
        excess
    }
}

struct LoggerInner {
    session: SessionContext,
    settings: LoggerSettings,
    store: Option<Arc<dyn DocumentStore>>,
    sink: Arc<dyn LogSink>,
    buffer: Mutex<LogBuffer>,
    timer: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<Vec<JoinHandle<FlushOutcome>>>,
}

/// Handle to a shared logger; clones refer to the same buffer and session.
#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<LoggerInner>,
}

// A poisoned lock only means another recorder panicked mid-push; the Vec is
// still valid, and logging must keep working.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Context map carrying the acting user's id
pub fn user_context(user_id: &str) -> Map<String, Value> {
    let mut ctx = Map::new();
    ctx.insert("userId".to_string(), Value::String(user_id.to_string()));
    ctx
}

impl EventLogger {
    pub fn new(
        settings: LoggerSettings,
        store: Option<Arc<dyn DocumentStore>>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self::with_session(SessionContext::new(), settings, store, sink)
    }

    pub fn with_session(
        session: SessionContext,
        settings: LoggerSettings,
        store: Option<Arc<dyn DocumentStore>>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                session,
                settings,
                store,
                sink,
                buffer: Mutex::new(LogBuffer::default()),
                timer: Mutex::new(None),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session.session_id
    }

    pub fn settings(&self) -> &LoggerSettings {
        &self.inner.settings
    }

    /// Entries are buffered only with persistence switched on and a store present
    pub fn persistence_enabled(&self) -> bool {
        self.inner.settings.enable_persistence && self.inner.store.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.inner.buffer).entries.len()
    }

    /// Snapshot of the buffered entries, oldest first
    pub fn buffered_entries(&self) -> Vec<LogEntry> {
        lock(&self.inner.buffer).entries.clone()
    }

    fn build_entry(
        &self,
        level: LogLevel,
        message: String,
        data: Option<Value>,
        context: Option<Map<String, Value>>,
    ) -> LogEntry {
        let mut ctx = Map::new();
        ctx.insert(
            "sessionId".to_string(),
            Value::String(self.inner.session.session_id.clone()),
        );
        if let Some(extra) = context {
            ctx.extend(extra);
        }

        LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            message,
            data: data.as_ref().map(sanitize),
            context: ctx,
        }
    }

    /// Record one entry. Never blocks on storage and never fails.
    pub fn record(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
        context: Option<Map<String, Value>>,
    ) -> LogEntry {
        let entry = self.build_entry(level, message.into(), data, context);
        self.inner.sink.emit(&entry);

        if self.persistence_enabled() {
            let (full, dropped) = {
                let mut buffer = lock(&self.inner.buffer);
                buffer.entries.push(entry.clone());
                buffer.fresh += 1;
                let dropped = buffer.trim_to(self.inner.settings.max_retained_entries);
                let full = (buffer.fresh >= self.inner.settings.max_buffer_size)
                    .then(|| buffer.take());
                (full, dropped)
            };
            self.report_dropped(dropped);
            if let Some(batch) = full {
                self.spawn_write(batch);
            }
        }

        entry
    }

    pub fn debug(&self, message: impl Into<String>, data: Option<Value>) -> LogEntry {
        self.record(LogLevel::Debug, message, data, None)
    }

    pub fn info(&self, message: impl Into<String>, data: Option<Value>) -> LogEntry {
        self.record(LogLevel::Info, message, data, None)
    }

    pub fn warn(&self, message: impl Into<String>, data: Option<Value>) -> LogEntry {
        self.record(LogLevel::Warn, message, data, None)
    }

    pub fn error(&self, message: impl Into<String>, data: Option<Value>) -> LogEntry {
        self.record(LogLevel::Error, message, data, None)
    }

    /// ERROR entry describing a failed operation and its cause
    pub fn error_with(
        &self,
        message: impl Into<String>,
        err: &dyn std::error::Error,
        context: Option<Map<String, Value>>,
    ) -> LogEntry {
        self.record(
            LogLevel::Error,
            message,
            Some(json!({ "error": err.to_string() })),
            context,
        )
    }

    pub fn security(
        &self,
        event: impl Into<String>,
        data: Option<Value>,
        context: Option<Map<String, Value>>,
    ) -> LogEntry {
        self.record(LogLevel::Security, event, data, context)
    }

    pub fn user_action(
        &self,
        action: impl Into<String>,
        data: Option<Value>,
        context: Option<Map<String, Value>>,
    ) -> LogEntry {
        self.record(LogLevel::UserAction, action, data, context)
    }

    /// PERFORMANCE entry; `data.operation` and `data.duration` (ms) feed statistics
    pub fn performance(&self, operation: &str, duration_ms: f64, data: Option<Value>) -> LogEntry {
        let mut payload = match data {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("details".to_string(), other);
                map
            }
            None => Map::new(),
        };
        payload.insert("operation".to_string(), json!(operation));
        payload.insert("duration".to_string(), json!(duration_ms));
        self.record(
            LogLevel::Performance,
            format!("Performance: {operation}"),
            Some(Value::Object(payload)),
            None,
        )
    }

    /// Run `fut` and record how long it took
    pub async fn time_operation<F, T>(&self, operation: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let out = fut.await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        self.performance(operation, elapsed, None);
        out
    }

    /// Emit to the sink only. Used for the logger's own diagnostics so a
    /// failing store cannot feed entries back into the buffer.
    fn emit_internal(&self, level: LogLevel, message: &str, data: Value) {
        let entry = self.build_entry(level, message.to_string(), Some(data), None);
        self.inner.sink.emit(&entry);
    }

    fn spawn_write(&self, batch: Vec<LogEntry>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                let task = handle.spawn(async move { this.write_batch(batch).await });
                let mut pending = lock(&self.inner.pending);
                pending.retain(|h| !h.is_finished());
                pending.push(task);
            }
            // No runtime to write from: keep the entries for the next flush
            Err(_) => self.requeue(batch),
        }
    }

    async fn write_batch(&self, batch: Vec<LogEntry>) -> FlushOutcome {
        let Some(store) = self.inner.store.clone() else {
            self.requeue(batch);
            return FlushOutcome::Skipped;
        };
        let count = batch.len();

        let ops: PortalResult<Vec<BatchOp>> = batch
            .iter()
            .map(|entry| Ok(BatchOp::set(collections::LOGS, entry.id.clone(), to_document(entry)?)))
            .collect();
        let result = match ops {
            Ok(ops) => store.commit(ops).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => FlushOutcome::Flushed(count),
            Err(e) => {
                self.emit_internal(
                    LogLevel::Error,
                    "Failed to flush logs",
                    json!({ "error": e.to_string(), "count": count }),
                );
                self.requeue(batch);
                FlushOutcome::Requeued(count)
            }
        }
    }

    /// Put a failed batch back ahead of anything recorded since it was taken.
    /// The batch does not count as fresh: it is retried by the timer, by an
    /// explicit flush, or along with the next full batch.
    fn requeue(&self, batch: Vec<LogEntry>) {
        let dropped = {
            let mut buffer = lock(&self.inner.buffer);
            let arrived = std::mem::take(&mut buffer.entries);
            buffer.entries = batch;
            buffer.entries.extend(arrived);
            buffer.trim_to(self.inner.settings.max_retained_entries)
        };
        self.report_dropped(dropped);
    }

    fn report_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.emit_internal(
                LogLevel::Warn,
                "Log buffer over capacity, dropped oldest entries",
                json!({ "dropped": dropped }),
            );
        }
    }

    /// Write everything currently buffered as one batch
    pub async fn flush(&self) -> FlushOutcome {
        if !self.persistence_enabled() {
            return FlushOutcome::Skipped;
        }
        let batch = lock(&self.inner.buffer).take();
        if batch.is_empty() {
            return FlushOutcome::Skipped;
        }
        self.write_batch(batch).await
    }

    /// Wait for capacity-triggered writes that are still running
    pub async fn wait_pending(&self) {
        let pending: Vec<_> = std::mem::take(&mut *lock(&self.inner.pending));
        for task in pending {
            if let Err(e) = task.await {
                self.emit_internal(
                    LogLevel::Error,
                    "Log write task failed",
                    json!({ "error": e.to_string() }),
                );
            }
        }
    }

    /// Start the periodic flush timer. Calling it twice keeps the first timer.
    pub fn start(&self) {
        if !self.persistence_enabled() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Event logger started outside a tokio runtime; periodic flush disabled");
            return;
        };
        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return;
        }

        let period = self.inner.settings.flush_interval();
        let weak: Weak<LoggerInner> = Arc::downgrade(&self.inner);
        *timer = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Stop once every handle to the logger is gone
                let Some(inner) = weak.upgrade() else { break };
                EventLogger { inner }.flush().await;
            }
        }));
    }

    pub fn timer_running(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Final flush, then stop the timer
    pub async fn shutdown(&self) -> FlushOutcome {
        self.wait_pending().await;
        let outcome = self.flush().await;
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
        tracing::info!(session_id = %self.session_id(), outcome = ?outcome, "Event logger shut down");
        outcome
    }
}
