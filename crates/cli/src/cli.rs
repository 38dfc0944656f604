use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

/// Priority worker pool with live execution-time anomaly detection.
///
/// `stress` drives a synthetic workload through the pool and logs every
/// completion to CSV; `analyze` re-scores such a log offline.
#[derive(Parser, Debug)]
#[command(
    name = "triage",
    version,
    about = "Priority worker pool with live latency anomaly detection"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a randomized workload with injected slow jobs
    Stress(StressArgs),
    /// Re-score an execution log with batch z-score and IQR methods
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StressArgs {
    /// Number of jobs to submit
    #[arg(long, default_value_t = 100)]
    pub jobs: usize,

    /// Worker thread count (overrides config and TRIAGE_WORKER_THREADS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// TOML config file with [scheduler] and [detector] sections
    #[arg(long, env = "TRIAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where to write the execution log
    #[arg(long, default_value = "execution_log.csv")]
    pub output: PathBuf,

    /// Probability that a job is made deliberately slow
    #[arg(long, default_value_t = 0.15)]
    pub anomaly_rate: f64,

    /// Sleep range for normal jobs, in milliseconds (MIN..=MAX)
    #[arg(long, default_value = "50..=150")]
    pub normal_ms: MillisRange,

    /// Sleep range for injected slow jobs, in milliseconds (MIN..=MAX)
    #[arg(long, default_value = "300..=800")]
    pub slow_ms: MillisRange,

    /// Job `i` is submitted at priority `i % priority_levels`
    #[arg(long, default_value_t = 10)]
    pub priority_levels: u32,

    /// Number of threads submitting concurrently
    #[arg(long, default_value_t = 1)]
    pub submitters: usize,

    /// Seconds to let the pool run before stopping it
    #[arg(long, default_value_t = 15)]
    pub wait_secs: u64,

    /// Seed for the workload generator (random if unset)
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Execution log produced by `triage stress`
    pub csv: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Inclusive millisecond range, written `MIN..=MAX`, `MIN..MAX` or `MIN-MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MillisRange {
    pub min: u64,
    pub max: u64,
}

impl FromStr for MillisRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once("..=")
            .or_else(|| s.split_once(".."))
            .or_else(|| s.split_once('-'))
            .ok_or_else(|| format!("expected MIN..=MAX, got '{s}'"))?;
        let min: u64 = min.trim().parse().map_err(|e| format!("bad minimum '{min}': {e}"))?;
        let max: u64 = max.trim().parse().map_err(|e| format!("bad maximum '{max}': {e}"))?;
        if min > max {
            return Err(format!("minimum {min} exceeds maximum {max}"));
        }
        Ok(Self { min, max })
    }
}

impl fmt::Display for MillisRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}
