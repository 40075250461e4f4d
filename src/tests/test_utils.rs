// src/tests/test_utils.rs
// Shared test doubles: a sink that records entries and a store that can be told to fail

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::config_loader::LoggerSettings;
use crate::document_store::{BatchOp, Document, DocumentStore, Query};
use crate::document_store_memory::MemoryDocumentStore;
use crate::errors::{PortalError, PortalResult};
use crate::event_logger::EventLogger;
use crate::log_sink::{LogEntry, LogLevel, LogSink};

/// Keeps every emitted entry for later inspection
#[derive(Default)]
pub struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl CapturingSink {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count_level(&self, level: LogLevel) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

impl LogSink for CapturingSink {
    fn emit(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

/// Memory store whose writes fail while `fail_writes` is set
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryDocumentStore,
    fail_writes: AtomicBool,
    failing_collection: Mutex<Option<String>>,
    commits: AtomicUsize,
    failed_commits: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Fail writes to one collection only
    pub fn fail_collection(&self, collection: &str) {
        *self.failing_collection.lock().unwrap() = Some(collection.to_string());
    }

    /// Successful commits so far
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn failed_commits(&self) -> usize {
        self.failed_commits.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str, collection: &str) -> PortalResult<()> {
        let targeted = self.failing_collection.lock().unwrap().as_deref() == Some(collection);
        if targeted || self.fail_writes.load(Ordering::SeqCst) {
            Err(PortalError::storage_msg(operation, "simulated outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> PortalResult<Option<Document>> {
        // Let concurrent callers interleave between a read and the write that follows it
        tokio::task::yield_now().await;
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortalResult<()> {
        self.check("set", collection)?;
        self.inner.set(collection, id, data).await
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> PortalResult<()> {
        self.check("update", collection)?;
        self.inner.update(collection, id, partial).await
    }

    async fn delete(&self, collection: &str, id: &str) -> PortalResult<()> {
        self.check("delete", collection)?;
        self.inner.delete(collection, id).await
    }

    async fn query(&self, collection: &str, query: &Query) -> PortalResult<Vec<Document>> {
        self.inner.query(collection, query).await
    }

    async fn commit(&self, ops: Vec<BatchOp>) -> PortalResult<()> {
        let collection = match ops.first() {
            Some(BatchOp::Set { collection, .. })
            | Some(BatchOp::Update { collection, .. })
            | Some(BatchOp::Delete { collection, .. }) => collection.clone(),
            None => String::new(),
        };
        if let Err(e) = self.check("commit", &collection) {
            self.failed_commits.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        self.inner.commit(ops).await?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

pub fn logger_settings(max_buffer_size: usize) -> LoggerSettings {
    LoggerSettings {
        enable_persistence: true,
        max_buffer_size,
        flush_interval_secs: 30,
        max_retained_entries: max_buffer_size * 10,
    }
}

/// Logger writing to `store`, mirroring into a fresh capturing sink
pub fn capturing_logger(
    settings: LoggerSettings,
    store: Arc<dyn DocumentStore>,
) -> (EventLogger, Arc<CapturingSink>) {
    let sink = Arc::new(CapturingSink::default());
    let logger = EventLogger::new(settings, Some(store), sink.clone());
    (logger, sink)
}
