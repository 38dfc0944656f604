use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::job::{Job, JobMeta};
use crate::sink::{CompletionRecord, FailureRecord};

use super::core::{SchedulerState, Shared};

thread_local! {
    /// Address of the pool this thread works for (0 = not a worker).
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

fn pool_key(shared: &Arc<Shared>) -> usize {
    Arc::as_ptr(shared) as usize
}

/// Whether the calling thread is one of `shared`'s workers.
pub(super) fn is_worker_of(shared: &Arc<Shared>) -> bool {
    CURRENT_POOL.with(|c| c.get() == pool_key(shared))
}

/// Worker thread body: Waiting -> Executing -> Reporting, until shutdown.
pub(super) fn run(shared: Arc<Shared>, worker_id: usize) {
    CURRENT_POOL.with(|c| c.set(pool_key(&shared)));
    debug!(worker_id, "Worker started");

    while let Some(job) = next_job(&shared) {
        execute(&shared, worker_id, job);
        finish(&shared);
    }

    debug!(worker_id, "Worker exited");
}

/// Block until a job is available or the scheduler leaves `Running`.
fn next_job(shared: &Shared) -> Option<Job> {
    let mut dispatch = shared.lock_dispatch();
    loop {
        dispatch = shared
            .work_available
            .wait_while(dispatch, |d| {
                d.state == SchedulerState::Running && d.queue.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if dispatch.state != SchedulerState::Running {
            return None;
        }

        match dispatch.queue.pop_max() {
            Ok(job) => {
                dispatch.in_flight += 1;
                return Some(job);
            }
            Err(e) => error!(error = %e, "Woken with an empty queue while running"),
        }
    }
}

/// Run one job with no lock held, then report its outcome.
fn execute(shared: &Shared, worker_id: usize, job: Job) {
    let (task, meta) = job.into_parts();
    debug!(
        worker_id,
        job_id = meta.id,
        priority = meta.priority,
        "Executing job"
    );

    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(task));
    let finished = Instant::now();

    let timing = Timing::new(&meta, started, finished);
    match outcome {
        Ok(()) => report_completion(shared, worker_id, &meta, &timing),
        Err(payload) => report_failure(shared, worker_id, &meta, &timing, payload.as_ref()),
    }
}

/// Mark the job done and wake `wait_idle` callers if nothing is left.
fn finish(shared: &Shared) {
    let mut dispatch = shared.lock_dispatch();
    dispatch.in_flight = dispatch.in_flight.saturating_sub(1);
    if dispatch.in_flight == 0 && dispatch.queue.is_empty() {
        shared.idle.notify_all();
    }
}

/// Timestamps for one execution, all derived from the monotonic clock.
struct Timing {
    queue_wait: Duration,
    exec: Duration,
    submit_time: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl Timing {
    fn new(meta: &JobMeta, started: Instant, finished: Instant) -> Self {
        let queue_wait = started.saturating_duration_since(meta.submitted_instant);
        let exec = finished.saturating_duration_since(started);
        let start_time = offset(meta.submitted_at, queue_wait);
        let end_time = offset(start_time, exec);
        Self {
            queue_wait,
            exec,
            submit_time: meta.submitted_at,
            start_time,
            end_time,
        }
    }
}

fn offset(base: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| base.checked_add_signed(delta))
        .unwrap_or(base)
}

fn report_completion(shared: &Shared, worker_id: usize, meta: &JobMeta, timing: &Timing) {
    let exec_ms = timing.exec.as_secs_f64() * 1000.0;
    let observation = shared
        .detector
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .score(exec_ms);

    let record = CompletionRecord {
        job_id: meta.id,
        priority: meta.priority,
        worker_id,
        submit_time: timing.submit_time,
        start_time: timing.start_time,
        end_time: timing.end_time,
        exec_duration_ms: timing.exec.as_millis() as u64,
        queue_wait_ms: timing.queue_wait.as_millis() as u64,
        is_anomaly: observation.is_anomaly,
        z_score: observation.z_score,
    };

    shared.with_metrics(|m| {
        m.record_completion(
            worker_id,
            timing.exec,
            timing.queue_wait,
            observation.is_anomaly,
        )
    });

    if record.is_anomaly {
        warn!(
            job_id = record.job_id,
            worker_id,
            exec_ms = record.exec_duration_ms,
            mean_ms = observation.mean,
            z_score = observation.z_score.unwrap_or_default(),
            "Execution time anomaly"
        );
    }

    deliver(meta, || shared.sink.on_complete(&record));
}

fn report_failure(
    shared: &Shared,
    worker_id: usize,
    meta: &JobMeta,
    timing: &Timing,
    payload: &(dyn Any + Send),
) {
    let message = panic_message(payload);
    warn!(job_id = meta.id, worker_id, error = %message, "Job panicked");

    let record = FailureRecord {
        job_id: meta.id,
        priority: meta.priority,
        worker_id,
        submit_time: timing.submit_time,
        start_time: timing.start_time,
        end_time: timing.end_time,
        message,
    };

    shared.with_metrics(|m| m.record_failure());
    deliver(meta, || shared.sink.on_failure(&record));
}

/// Hand a record to the sink; a panicking sink must not take the worker down.
fn deliver(meta: &JobMeta, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(job_id = meta.id, "Completion sink panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
