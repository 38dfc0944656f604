//! Scheduler runner -- owns the worker pool and the dispatch queue.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, lifecycle (start / submit / stop) and accessors
//! - `worker`: the per-thread dispatch loop (wait, execute, report)

mod core;
mod worker;
#[cfg(test)]
mod tests;

pub use self::core::{Scheduler, SchedulerState};
