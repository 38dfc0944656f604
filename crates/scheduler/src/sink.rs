use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::job::{JobId, Priority};

/// Outbound fact emitted once per successfully finished job.
///
/// `end_time - start_time` and `start_time - submit_time` are derived from a
/// monotonic clock, so both durations are always non-negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRecord {
    pub job_id: JobId,
    pub priority: Priority,
    pub worker_id: usize,
    pub submit_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exec_duration_ms: u64,
    pub queue_wait_ms: u64,
    pub is_anomaly: bool,
    pub z_score: Option<f64>,
}

/// Emitted instead of a [`CompletionRecord`] when a job's task panics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub job_id: JobId,
    pub priority: Priority,
    pub worker_id: usize,
    pub submit_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub message: String,
}

/// Receiver for per-job outcomes. Called from worker threads, outside the
/// dispatch lock.
pub trait CompletionSink: Send + Sync {
    fn on_complete(&self, record: &CompletionRecord);

    /// The worker has already logged the panic at `warn`.
    fn on_failure(&self, record: &FailureRecord) {
        debug!(
            job_id = record.job_id,
            worker_id = record.worker_id,
            error = %record.message,
            "job failed"
        );
    }
}

// ── TracingSink ─────────────────────────────────────────────────────

/// Logs every record as structured `tracing` fields at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl CompletionSink for TracingSink {
    fn on_complete(&self, r: &CompletionRecord) {
        debug!(
            job_id = r.job_id,
            worker_id = r.worker_id,
            priority = r.priority,
            exec_ms = r.exec_duration_ms,
            wait_ms = r.queue_wait_ms,
            anomaly = r.is_anomaly,
            "job completed"
        );
    }

    fn on_failure(&self, r: &FailureRecord) {
        debug!(
            job_id = r.job_id,
            worker_id = r.worker_id,
            priority = r.priority,
            error = %r.message,
            "job failed"
        );
    }
}

// ── MemorySink ──────────────────────────────────────────────────────

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    completed: Mutex<Vec<CompletionRecord>>,
    failed: Mutex<Vec<FailureRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of completion records in arrival order.
    pub fn completed(&self) -> Vec<CompletionRecord> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of failure records in arrival order.
    pub fn failed(&self) -> Vec<FailureRecord> {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl CompletionSink for MemorySink {
    fn on_complete(&self, record: &CompletionRecord) {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }

    fn on_failure(&self, record: &FailureRecord) {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

// ── FanoutSink ──────────────────────────────────────────────────────

/// Forwards every record to each inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn CompletionSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl CompletionSink for FanoutSink {
    fn on_complete(&self, record: &CompletionRecord) {
        for sink in &self.sinks {
            sink.on_complete(record);
        }
    }

    fn on_failure(&self, record: &FailureRecord) {
        for sink in &self.sinks {
            sink.on_failure(record);
        }
    }
}
