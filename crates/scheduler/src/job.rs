use std::cmp::Ordering;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Scheduler-assigned job identifier. Starts at 1 and only grows.
pub type JobId = u64;

/// Job priority. Larger values are dispatched sooner; no range is enforced.
pub type Priority = i64;

/// The unit of work carried by a [`Job`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A submitted unit of work waiting in (or just popped from) the queue.
///
/// Only the scheduler constructs jobs. Fields are read-only after creation
/// and the task is moved out exactly once, by the worker that executes it.
pub struct Job {
    id: JobId,
    priority: Priority,
    task: Task,
    submitted_at: DateTime<Utc>,
    submitted_instant: Instant,
}

impl Job {
    pub(crate) fn new(id: JobId, priority: Priority, task: Task) -> Self {
        Self {
            id,
            priority,
            task,
            submitted_at: Utc::now(),
            submitted_instant: Instant::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Wall-clock time the scheduler accepted the job.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Monotonic counterpart of [`Job::submitted_at`], used for all duration math.
    pub fn submitted_instant(&self) -> Instant {
        self.submitted_instant
    }

    /// Consume the job, yielding its task and metadata.
    pub(crate) fn into_parts(self) -> (Task, JobMeta) {
        let meta = JobMeta {
            id: self.id,
            priority: self.priority,
            submitted_at: self.submitted_at,
            submitted_instant: self.submitted_instant,
        };
        (self.task, meta)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

/// Job metadata kept by the worker after the task has been taken.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobMeta {
    pub id: JobId,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
    pub submitted_instant: Instant,
}

// Heap order: higher priority first, then lower id (earlier submission) first.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}
