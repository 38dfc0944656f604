use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};
use triage_core::TriageConfig;

use crate::detector::{AnomalyDetector, SharedDetector};
use crate::error::{Result, SchedulerError};
use crate::job::{Job, JobId, Priority};
use crate::metrics::SchedulerMetrics;
use crate::queue::JobQueue;
use crate::sink::CompletionSink;

use super::worker;

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Constructed; jobs may be queued but nothing runs.
    Idle,
    /// Workers are dispatching.
    Running,
    /// `stop` has been requested; no further dispatch.
    Stopping,
    /// Workers joined and the backlog discarded.
    Stopped,
}

impl SchedulerState {
    fn accepts_jobs(self) -> bool {
        matches!(self, SchedulerState::Idle | SchedulerState::Running)
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopping => write!(f, "stopping"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Everything guarded by the dispatch lock.
pub(super) struct Dispatch {
    pub(super) queue: JobQueue,
    pub(super) state: SchedulerState,
    /// Jobs popped by a worker and not yet reported.
    pub(super) in_flight: usize,
}

/// State shared between the scheduler handle and its worker threads.
pub(super) struct Shared {
    pub(super) dispatch: Mutex<Dispatch>,
    /// Signaled on submit (one worker) and on stop (all workers).
    pub(super) work_available: Condvar,
    /// Signaled when the queue is empty and nothing is in flight.
    pub(super) idle: Condvar,
    pub(super) next_id: AtomicU64,
    pub(super) worker_count: AtomicUsize,
    pub(super) detector: SharedDetector,
    pub(super) sink: Arc<dyn CompletionSink>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
}

impl Shared {
    // Tasks run outside every scheduler lock, so a poisoned guard never
    // protects a half-applied update.
    pub(super) fn lock_dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn with_metrics(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
    }
}

/// A fixed-size worker pool that runs jobs in priority order and scores
/// every execution time with a rolling-window anomaly detector.
pub struct Scheduler {
    config: TriageConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler that reports outcomes to `sink`.
    ///
    /// Fails fast on an invalid worker count or detector configuration.
    pub fn new(config: TriageConfig, sink: Arc<dyn CompletionSink>) -> Result<Self> {
        config.validate()?;
        let detector = AnomalyDetector::new(&config.detector)?.shared();

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                dispatch: Mutex::new(Dispatch {
                    queue: JobQueue::new(),
                    state: SchedulerState::Idle,
                    in_flight: 0,
                }),
                work_available: Condvar::new(),
                idle: Condvar::new(),
                next_id: AtomicU64::new(0),
                worker_count: AtomicUsize::new(0),
                detector,
                sink,
                metrics: RwLock::new(SchedulerMetrics::default()),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start `config.scheduler.worker_threads` workers.
    pub fn start_configured(&self) -> Result<()> {
        self.start(self.config.scheduler.worker_threads)
    }

    /// Launch exactly `num_workers` worker threads.
    pub fn start(&self, num_workers: usize) -> Result<()> {
        if num_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "num_workers must be positive".into(),
            ));
        }

        // Held for the whole spawn so a concurrent `stop` joins every worker.
        let mut workers = self.lock_workers();
        let queued = {
            let mut dispatch = self.shared.lock_dispatch();
            if dispatch.state != SchedulerState::Idle {
                return Err(SchedulerError::AlreadyStarted);
            }
            dispatch.state = SchedulerState::Running;
            dispatch.queue.len()
        };
        self.shared.worker_count.store(num_workers, Ordering::Relaxed);

        let mut spawn_error = None;
        for worker_id in 0..num_workers {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("triage-worker-{worker_id}"))
                .spawn(move || worker::run(shared, worker_id));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to spawn worker thread");
                    spawn_error = Some(e);
                    break;
                }
            }
        }
        drop(workers);

        if let Some(e) = spawn_error {
            self.stop();
            return Err(SchedulerError::Spawn(e));
        }

        info!(workers = num_workers, queued, "Scheduler started");
        Ok(())
    }

    /// Queue `task` at `priority` and return its id without waiting for it to run.
    pub fn submit<F>(&self, task: F, priority: Priority) -> Result<JobId>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let job = Job::new(id, priority, Box::new(task));

        {
            let mut dispatch = self.shared.lock_dispatch();
            if !dispatch.state.accepts_jobs() {
                return Err(SchedulerError::NotAccepting);
            }
            // Counted before any worker can pop the job.
            self.shared.with_metrics(|m| m.jobs_submitted += 1);
            dispatch.queue.insert(job);
        }
        self.shared.work_available.notify_one();

        debug!(job_id = id, priority, "Job submitted");
        Ok(id)
    }

    /// Stop dispatching, wait for in-flight jobs, and discard the backlog.
    ///
    /// Returns the number of queued jobs that were discarded. Calling it on a
    /// stopped scheduler is a no-op returning 0. Called from inside a task it
    /// only requests shutdown; the owner's `stop` (or drop) finishes it.
    pub fn stop(&self) -> usize {
        {
            let mut dispatch = self.shared.lock_dispatch();
            match dispatch.state {
                SchedulerState::Stopped => return 0,
                SchedulerState::Idle | SchedulerState::Running => {
                    info!("Scheduler shutdown requested");
                    dispatch.state = SchedulerState::Stopping;
                }
                SchedulerState::Stopping => {}
            }
        }
        self.shared.work_available.notify_all();

        if worker::is_worker_of(&self.shared) {
            return 0;
        }

        {
            let mut workers = self.lock_workers();
            for handle in workers.drain(..) {
                if handle.join().is_err() {
                    error!("Worker thread panicked outside a job");
                }
            }
        }

        let discarded = {
            let mut dispatch = self.shared.lock_dispatch();
            if dispatch.state == SchedulerState::Stopped {
                return 0;
            }
            let discarded = dispatch.queue.drain().len();
            dispatch.state = SchedulerState::Stopped;
            discarded
        };
        self.shared.idle.notify_all();
        self.shared.with_metrics(|m| m.jobs_discarded += discarded as u64);

        if discarded > 0 {
            info!(discarded, "Discarded queued jobs on shutdown");
        }
        info!("Scheduler stopped");
        discarded
    }

    /// Block until the queue is empty and no job is executing, or `timeout` elapses.
    ///
    /// Returns `true` if the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.shared.lock_dispatch();
        let (_guard, result) = self
            .shared
            .idle
            .wait_timeout_while(guard, timeout, |d| !d.queue.is_empty() || d.in_flight > 0)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.shared.lock_dispatch().state
    }

    /// Number of jobs waiting to be dispatched.
    pub fn queue_len(&self) -> usize {
        self.shared.lock_dispatch().queue.len()
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let (in_flight, queued) = {
            let dispatch = self.shared.lock_dispatch();
            (dispatch.in_flight, dispatch.queue.len())
        };
        let mut snapshot = self
            .shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.set_activity(
            in_flight,
            self.shared.worker_count.load(Ordering::Relaxed),
            queued,
        );
        snapshot
    }

    /// Get a handle to the shared anomaly detector.
    pub fn detector(&self) -> SharedDetector {
        Arc::clone(&self.shared.detector)
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .field("config", &self.config)
            .finish()
    }
}
