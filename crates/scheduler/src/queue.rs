use std::collections::BinaryHeap;

use crate::error::{Result, SchedulerError};
use crate::job::{Job, Priority};

/// Pending jobs ordered by priority (ties broken by submission order).
///
/// Not synchronized: the scheduler only touches it while holding its
/// dispatch lock.
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job. O(log n).
    pub fn insert(&mut self, job: Job) {
        self.heap.push(job);
    }

    /// Remove the highest-priority job. O(log n).
    pub fn pop_max(&mut self) -> Result<Job> {
        self.heap.pop().ok_or(SchedulerError::Empty)
    }

    /// Priority of the job `pop_max` would return next.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.heap.peek().map(Job::priority)
    }

    /// Remove every pending job, in no particular order.
    pub fn drain(&mut self) -> Vec<Job> {
        self.heap.drain().collect()
    }

    /// Returns the current number of pending jobs
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no job is pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
