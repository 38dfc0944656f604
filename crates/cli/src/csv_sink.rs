//! Execution log writer.
//!
//! One row per completed job, flushed as it is written so a crashed or
//! interrupted run still leaves a readable log.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use triage_scheduler::{CompletionRecord, CompletionSink, FailureRecord};

pub const CSV_HEADER: &str =
    "JobID,ThreadID,Priority,SubmitTime,StartTime,EndTime,ExecDurationMS,QueueWaitMS,IsAnomaly";

/// [`CompletionSink`] that appends each record to a CSV file.
///
/// Timestamps are written as milliseconds since the Unix epoch and
/// `IsAnomaly` as `1`/`0`.
pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl CsvSink {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;
        info!(path = %path.display(), "Execution log opened");
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_row(&self, row: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{row}")?;
        writer.flush()
    }
}

fn epoch_ms(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Render one record as a CSV row matching [`CSV_HEADER`].
pub fn format_row(r: &CompletionRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{}",
        r.job_id,
        r.worker_id,
        r.priority,
        epoch_ms(&r.submit_time),
        epoch_ms(&r.start_time),
        epoch_ms(&r.end_time),
        r.exec_duration_ms,
        r.queue_wait_ms,
        u8::from(r.is_anomaly),
    )
}

impl CompletionSink for CsvSink {
    fn on_complete(&self, record: &CompletionRecord) {
        if let Err(e) = self.write_row(&format_row(record)) {
            warn!(
                job_id = record.job_id,
                path = %self.path.display(),
                error = %e,
                "Failed to write execution log row"
            );
        }
    }

    // The log only holds completed jobs.
    fn on_failure(&self, record: &FailureRecord) {
        debug!(
            job_id = record.job_id,
            error = %record.message,
            "Failed job not logged to CSV"
        );
    }
}
