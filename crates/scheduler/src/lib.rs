pub mod detector;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod runner;
pub mod sink;

pub use detector::{AnomalyDetector, Observation, SharedDetector};
pub use error::{Result, SchedulerError};
pub use job::{Job, JobId, Priority, Task};
pub use metrics::SchedulerMetrics;
pub use queue::JobQueue;
pub use runner::{Scheduler, SchedulerState};
pub use sink::{
    CompletionRecord, CompletionSink, FailureRecord, FanoutSink, MemorySink, TracingSink,
};
pub use triage_core::{DetectorConfig, TriageConfig};
