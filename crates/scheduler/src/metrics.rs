use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Jobs accepted by `submit`.
    pub jobs_submitted: u64,
    /// Jobs whose task returned normally.
    pub jobs_completed: u64,
    /// Jobs whose task panicked.
    pub jobs_failed: u64,
    /// Completed jobs the detector flagged.
    pub anomalies_flagged: u64,
    /// Queued jobs thrown away by `stop`.
    pub jobs_discarded: u64,
    /// Completed jobs per worker id.
    pub completed_by_worker: HashMap<usize, u64>,
    /// Mean execution time of completed jobs.
    pub avg_exec_duration: Duration,
    /// Mean time completed jobs spent queued.
    pub avg_queue_wait: Duration,
    /// When the last job completed.
    pub last_completed_at: Option<DateTime<Utc>>,
    /// Workers currently executing a task.
    pub active_workers: usize,
    /// Size of the pool.
    pub worker_count: usize,
    /// active_workers / worker_count (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Pending jobs at the time of the snapshot.
    pub queue_depth: usize,
}

impl SchedulerMetrics {
    /// Record a completed job.
    pub fn record_completion(
        &mut self,
        worker_id: usize,
        exec: Duration,
        wait: Duration,
        is_anomaly: bool,
    ) {
        self.jobs_completed += 1;
        *self.completed_by_worker.entry(worker_id).or_default() += 1;
        if is_anomaly {
            self.anomalies_flagged += 1;
        }
        self.last_completed_at = Some(Utc::now());

        let count = self.jobs_completed;
        self.avg_exec_duration = incremental_mean(self.avg_exec_duration, exec, count);
        self.avg_queue_wait = incremental_mean(self.avg_queue_wait, wait, count);
    }

    /// Record a job whose task panicked.
    pub fn record_failure(&mut self) {
        self.jobs_failed += 1;
    }

    pub(crate) fn set_activity(&mut self, active: usize, workers: usize, queue_depth: usize) {
        self.active_workers = active;
        self.worker_count = workers;
        self.worker_utilization = if workers == 0 {
            0.0
        } else {
            active as f64 / workers as f64
        };
        self.queue_depth = queue_depth;
    }
}

// new_avg = prev_avg + (value - prev_avg) / count
fn incremental_mean(prev: Duration, value: Duration, count: u64) -> Duration {
    if count <= 1 {
        return value;
    }
    let prev_nanos = prev.as_nanos() as f64;
    let cur_nanos = value.as_nanos() as f64;
    let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
    Duration::from_nanos(avg_nanos.max(0.0) as u64)
}
