use thiserror::Error;

/// Errors surfaced by the job queue and the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job queue is empty")]
    Empty,

    #[error("Scheduler already started")]
    AlreadyStarted,

    #[error("Scheduler is shutting down and not accepting jobs")]
    NotAccepting,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<triage_core::TriageError> for SchedulerError {
    fn from(err: triage_core::TriageError) -> Self {
        match err {
            triage_core::TriageError::InvalidConfig(msg) => SchedulerError::InvalidConfig(msg),
            other => SchedulerError::InvalidConfig(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
