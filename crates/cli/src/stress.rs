//! `triage stress`: drive a randomized workload through the pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{info, warn};
use triage_core::TriageConfig;
use triage_scheduler::{
    CompletionRecord, FanoutSink, JobId, MemorySink, Scheduler, SchedulerMetrics, TracingSink,
};

use crate::cli::StressArgs;
use crate::csv_sink::CsvSink;
use crate::workload::{PlannedJob, Workload};

pub fn run(args: StressArgs) -> Result<()> {
    let workload = Workload {
        jobs: args.jobs,
        anomaly_rate: args.anomaly_rate,
        normal_ms: args.normal_ms,
        slow_ms: args.slow_ms,
        priority_levels: args.priority_levels,
    };
    workload.validate()?;
    ensure!(args.submitters > 0, "--submitters must be positive");

    let config = load_config(&args)?;
    config.log_summary();

    let csv = Arc::new(
        CsvSink::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?,
    );
    let memory = Arc::new(MemorySink::new());
    let sink = FanoutSink::new()
        .with(csv)
        .with(memory.clone())
        .with(Arc::new(TracingSink));
    let scheduler = Scheduler::new(config, Arc::new(sink))?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let plan = workload.plan(&mut rng);
    info!(
        jobs = plan.len(),
        injected = plan.iter().filter(|j| j.injected).count(),
        submitters = args.submitters,
        "Workload planned"
    );

    let started = Instant::now();
    scheduler.start_configured()?;
    let planned = submit_all(&scheduler, &plan, args.submitters)?;

    let drained = scheduler.wait_idle(Duration::from_secs(args.wait_secs));
    if !drained {
        warn!(
            wait_secs = args.wait_secs,
            "Pool still busy at deadline, stopping"
        );
    }
    let discarded = scheduler.stop();

    let summary = RunSummary::collect(
        &planned,
        &memory.completed(),
        &scheduler.metrics(),
        discarded,
        drained,
        started.elapsed(),
    );
    summary.print(&args.output);
    Ok(())
}

fn load_config(args: &StressArgs) -> Result<TriageConfig> {
    let mut config = match &args.config {
        Some(path) => TriageConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TriageConfig::from_env().context("invalid configuration in environment")?,
    };
    if let Some(workers) = args.workers {
        config.scheduler.worker_threads = workers;
        config.validate()?;
    }
    Ok(config)
}

/// Submit the plan, from a dedicated rayon pool when more than one submitter
/// is requested. Returns the plan keyed by assigned job id.
fn submit_all(
    scheduler: &Scheduler,
    plan: &[PlannedJob],
    submitters: usize,
) -> Result<HashMap<JobId, PlannedJob>> {
    let submit_one = |job: &PlannedJob| -> Result<(JobId, PlannedJob)> {
        let id = scheduler.submit(job.task(), job.priority)?;
        Ok((id, *job))
    };

    if submitters == 1 {
        return plan.iter().map(submit_one).collect();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(submitters)
        .thread_name(|i| format!("triage-submit-{i}"))
        .build()
        .context("failed to build submitter pool")?;
    pool.install(|| plan.par_iter().map(submit_one).collect())
}

/// What a stress run did, compared against what was injected.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub submitted: usize,
    pub injected: usize,
    pub completed: usize,
    pub failed: u64,
    pub discarded: usize,
    pub flagged: usize,
    /// Flagged jobs that were injected slow.
    pub flagged_injected: usize,
    /// Injected slow jobs that completed without being flagged.
    pub missed_injected: usize,
    /// Flagged jobs drawn from the normal range.
    pub false_alarms: usize,
    pub avg_exec_ms: f64,
    pub avg_wait_ms: f64,
    pub drained: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn collect(
        planned: &HashMap<JobId, PlannedJob>,
        records: &[CompletionRecord],
        metrics: &SchedulerMetrics,
        discarded: usize,
        drained: bool,
        elapsed: Duration,
    ) -> Self {
        let mut flagged_injected = 0;
        let mut missed_injected = 0;
        let mut false_alarms = 0;
        for record in records {
            let injected = planned.get(&record.job_id).is_some_and(|j| j.injected);
            match (record.is_anomaly, injected) {
                (true, true) => flagged_injected += 1,
                (true, false) => false_alarms += 1,
                (false, true) => missed_injected += 1,
                (false, false) => {}
            }
        }

        Self {
            submitted: planned.len(),
            injected: planned.values().filter(|j| j.injected).count(),
            completed: records.len(),
            failed: metrics.jobs_failed,
            discarded,
            flagged: flagged_injected + false_alarms,
            flagged_injected,
            missed_injected,
            false_alarms,
            avg_exec_ms: metrics.avg_exec_duration.as_secs_f64() * 1000.0,
            avg_wait_ms: metrics.avg_queue_wait.as_secs_f64() * 1000.0,
            drained,
            elapsed,
        }
    }

    pub fn print(&self, output: &Path) {
        println!("Stress run finished in {:.1}s", self.elapsed.as_secs_f64());
        println!("  submitted:        {}", self.submitted);
        println!("  completed:        {}", self.completed);
        println!("  failed:           {}", self.failed);
        println!("  discarded:        {}", self.discarded);
        if !self.drained {
            println!("  (stopped before the queue drained)");
        }
        println!("  injected slow:    {}", self.injected);
        println!(
            "  flagged:          {} ({} injected, {} false alarms)",
            self.flagged, self.flagged_injected, self.false_alarms
        );
        println!("  missed injected:  {}", self.missed_injected);
        println!("  mean exec:        {:.1} ms", self.avg_exec_ms);
        println!("  mean queue wait:  {:.1} ms", self.avg_wait_ms);
        println!("  log:              {}", output.display());
    }
}
