//! Synthetic workload: mostly short sleeps with a fraction of injected slow jobs.

use std::thread;
use std::time::Duration;

use anyhow::{ensure, Result};
use rand::Rng;
use tracing::debug;

use crate::cli::MillisRange;

/// Shape of a generated workload.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub jobs: usize,
    pub anomaly_rate: f64,
    pub normal_ms: MillisRange,
    pub slow_ms: MillisRange,
    pub priority_levels: u32,
}

impl Workload {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.anomaly_rate),
            "anomaly rate must be within 0..=1, got {}",
            self.anomaly_rate
        );
        ensure!(self.priority_levels > 0, "priority levels must be positive");
        Ok(())
    }

    /// Draw one [`PlannedJob`] per job index.
    pub fn plan<R: Rng>(&self, rng: &mut R) -> Vec<PlannedJob> {
        let levels = i64::from(self.priority_levels.max(1));
        (0..self.jobs)
            .map(|index| {
                let injected = rng.gen_bool(self.anomaly_rate);
                let range = if injected { self.slow_ms } else { self.normal_ms };
                PlannedJob {
                    index,
                    priority: index as i64 % levels,
                    sleep_ms: rng.gen_range(range.min..=range.max),
                    injected,
                }
            })
            .collect()
    }
}

/// One job of a planned workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedJob {
    pub index: usize,
    pub priority: i64,
    pub sleep_ms: u64,
    /// Drawn from the slow range.
    pub injected: bool,
}

impl PlannedJob {
    /// The closure handed to the scheduler.
    pub fn task(self) -> impl FnOnce() + Send + 'static {
        move || {
            if self.injected {
                debug!(
                    job = self.index,
                    sleep_ms = self.sleep_ms,
                    "Injected slow job"
                );
            }
            thread::sleep(Duration::from_millis(self.sleep_ms));
        }
    }
}
