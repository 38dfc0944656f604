//! `triage analyze`: offline re-scoring of an execution log.
//!
//! The live detector only sees a sliding window; here the whole run is
//! available, so every job is scored against the full population with a
//! batch z-score (sample standard deviation) and Tukey's 1.5·IQR fences.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::AnalyzeArgs;

const Z_THRESHOLD: f64 = 2.0;
const IQR_FACTOR: f64 = 1.5;

pub fn run(args: AnalyzeArgs) -> Result<()> {
    let rows = read_log(&args.csv)?;
    info!(path = %args.csv.display(), rows = rows.len(), "Execution log loaded");
    let report = analyze(&rows);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// One parsed row of the execution log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub job_id: u64,
    pub worker_id: u64,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub exec_ms: f64,
    pub wait_ms: f64,
    /// `None` for logs written without the live detector column.
    pub is_anomaly: Option<bool>,
}

impl LogRow {
    /// Share of the job's lifetime spent executing rather than queued.
    fn efficiency(&self) -> Option<f64> {
        let total = self.exec_ms + self.wait_ms;
        (total > 0.0).then(|| self.exec_ms / total)
    }
}

pub fn read_log(path: &Path) -> Result<Vec<LogRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_log(&text).with_context(|| format!("malformed execution log {}", path.display()))
}

/// Parse CSV text, locating columns by header name.
pub fn parse_log(text: &str) -> Result<Vec<LogRow>> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        bail!("empty file");
    };
    let columns = Columns::from_header(header)?;

    lines
        .map(|(idx, line)| {
            columns
                .parse_row(line)
                .with_context(|| format!("line {}", idx + 1))
        })
        .collect()
}

struct Columns {
    job_id: usize,
    worker_id: usize,
    start: Option<usize>,
    end: Option<usize>,
    exec: usize,
    wait: usize,
    anomaly: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self> {
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &str| names.iter().position(|n| *n == name);
        let require = |name: &str| find(name).with_context(|| format!("missing column {name}"));

        Ok(Self {
            job_id: require("JobID")?,
            worker_id: require("ThreadID")?,
            start: find("StartTime"),
            end: find("EndTime"),
            exec: require("ExecDurationMS")?,
            wait: require("QueueWaitMS")?,
            anomaly: find("IsAnomaly"),
        })
    }

    fn parse_row(&self, line: &str) -> Result<LogRow> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |idx: usize| {
            fields.get(idx).copied().with_context(|| {
                format!("expected at least {} fields, got {}", idx + 1, fields.len())
            })
        };

        let optional_ms = |idx: Option<usize>| -> Result<Option<i64>> {
            idx.map(|i| field(i)?.parse::<i64>().context("bad timestamp"))
                .transpose()
        };

        Ok(LogRow {
            job_id: field(self.job_id)?.parse().context("bad JobID")?,
            worker_id: field(self.worker_id)?.parse().context("bad ThreadID")?,
            start_ms: optional_ms(self.start)?,
            end_ms: optional_ms(self.end)?,
            exec_ms: parse_duration(field(self.exec)?, "ExecDurationMS")?,
            wait_ms: parse_duration(field(self.wait)?, "QueueWaitMS")?,
            is_anomaly: self.anomaly.map(|i| parse_flag(field(i)?)).transpose()?,
        })
    }
}

/// Durations must be finite and non-negative; `NaN` would poison every mean.
fn parse_duration(s: &str, column: &str) -> Result<f64> {
    let ms: f64 = s.parse().with_context(|| format!("bad {column}"))?;
    ensure!(
        ms.is_finite() && ms >= 0.0,
        "bad {column} '{s}': must be a finite, non-negative number"
    );
    Ok(ms)
}

fn parse_flag(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => bail!("bad IsAnomaly value '{other}'"),
    }
}

// ── Statistics ──────────────────────────────────────────────────────

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with Bessel's correction.
fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Quantile of sorted data, linearly interpolated between closest ranks.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ExecStats {
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IqrFences {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Job ids flagged by each pair of methods.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Agreement {
    pub realtime_and_zscore: Vec<u64>,
    pub realtime_and_iqr: Vec<u64>,
    pub zscore_and_iqr: Vec<u64>,
    pub all_methods: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub jobs: usize,
    pub jobs_per_worker: BTreeMap<u64, usize>,
    /// First start to last end, when timestamps are present.
    pub span_ms: Option<i64>,
    pub exec: Option<ExecStats>,
    pub mean_queue_wait_ms: Option<f64>,
    /// Mean of exec / (exec + wait) over jobs with non-zero lifetime.
    pub mean_efficiency: Option<f64>,
    /// `None` when the log has no IsAnomaly column.
    pub realtime_anomalies: Option<Vec<u64>>,
    pub zscore_threshold: f64,
    pub zscore_anomalies: Vec<u64>,
    pub iqr: Option<IqrFences>,
    pub iqr_anomalies: Vec<u64>,
    pub agreement: Agreement,
}

pub fn analyze(rows: &[LogRow]) -> AnalysisReport {
    let exec: Vec<f64> = rows.iter().map(|r| r.exec_ms).collect();
    let waits: Vec<f64> = rows.iter().map(|r| r.wait_ms).collect();
    let efficiencies: Vec<f64> = rows.iter().filter_map(LogRow::efficiency).collect();

    let mut jobs_per_worker = BTreeMap::new();
    for r in rows {
        *jobs_per_worker.entry(r.worker_id).or_insert(0) += 1;
    }

    let first_start = rows.iter().filter_map(|r| r.start_ms).min();
    let last_end = rows.iter().filter_map(|r| r.end_ms).max();
    let span_ms = first_start.zip(last_end).map(|(s, e)| e - s);

    let exec_stats = mean(&exec).map(|mean_ms| ExecStats {
        mean_ms,
        std_dev_ms: sample_std_dev(&exec).unwrap_or(0.0),
        min_ms: exec.iter().copied().fold(f64::INFINITY, f64::min),
        max_ms: exec.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    });

    let zscore_anomalies = zscore_outliers(rows);
    let (iqr, iqr_anomalies) = iqr_outliers(rows);
    let realtime_anomalies = if rows.iter().all(|r| r.is_anomaly.is_some()) && !rows.is_empty() {
        Some(
            rows.iter()
                .filter(|r| r.is_anomaly == Some(true))
                .map(|r| r.job_id)
                .collect::<Vec<_>>(),
        )
    } else {
        None
    };

    let agreement = agreement(
        realtime_anomalies.as_deref().unwrap_or_default(),
        &zscore_anomalies,
        &iqr_anomalies,
    );

    AnalysisReport {
        jobs: rows.len(),
        jobs_per_worker,
        span_ms,
        exec: exec_stats,
        mean_queue_wait_ms: mean(&waits),
        mean_efficiency: mean(&efficiencies),
        realtime_anomalies,
        zscore_threshold: Z_THRESHOLD,
        zscore_anomalies,
        iqr,
        iqr_anomalies,
        agreement,
    }
}

fn zscore_outliers(rows: &[LogRow]) -> Vec<u64> {
    let exec: Vec<f64> = rows.iter().map(|r| r.exec_ms).collect();
    let (Some(m), Some(sd)) = (mean(&exec), sample_std_dev(&exec)) else {
        return Vec::new();
    };
    if sd <= f64::EPSILON {
        return Vec::new();
    }
    rows.iter()
        .filter(|r| ((r.exec_ms - m) / sd).abs() > Z_THRESHOLD)
        .map(|r| r.job_id)
        .collect()
}

fn iqr_outliers(rows: &[LogRow]) -> (Option<IqrFences>, Vec<u64>) {
    let mut sorted: Vec<f64> = rows.iter().map(|r| r.exec_ms).collect();
    sorted.sort_by(f64::total_cmp);
    let (Some(q1), Some(q3)) = (quantile(&sorted, 0.25), quantile(&sorted, 0.75)) else {
        return (None, Vec::new());
    };
    let iqr = q3 - q1;
    let fences = IqrFences {
        q1,
        q3,
        iqr,
        lower: q1 - IQR_FACTOR * iqr,
        upper: q3 + IQR_FACTOR * iqr,
    };
    let flagged = rows
        .iter()
        .filter(|r| r.exec_ms < fences.lower || r.exec_ms > fences.upper)
        .map(|r| r.job_id)
        .collect();
    (Some(fences), flagged)
}

fn agreement(realtime: &[u64], zscore: &[u64], iqr: &[u64]) -> Agreement {
    let realtime: BTreeSet<u64> = realtime.iter().copied().collect();
    let zscore: BTreeSet<u64> = zscore.iter().copied().collect();
    let iqr: BTreeSet<u64> = iqr.iter().copied().collect();
    let both = |a: &BTreeSet<u64>, b: &BTreeSet<u64>| {
        a.intersection(b).copied().collect::<Vec<_>>()
    };

    Agreement {
        realtime_and_zscore: both(&realtime, &zscore),
        realtime_and_iqr: both(&realtime, &iqr),
        zscore_and_iqr: both(&zscore, &iqr),
        all_methods: realtime
            .iter()
            .filter(|id| zscore.contains(id) && iqr.contains(id))
            .copied()
            .collect(),
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Jobs:                 {}", self.jobs)?;
        for (worker, count) in &self.jobs_per_worker {
            writeln!(f, "  worker {worker}:  {count}")?;
        }
        if let Some(span) = self.span_ms {
            writeln!(f, "Span:                 {span} ms")?;
        }
        if let Some(exec) = &self.exec {
            writeln!(
                f,
                "Exec time:            mean {:.1} ms, std {:.1} ms, min {:.0} ms, max {:.0} ms",
                exec.mean_ms, exec.std_dev_ms, exec.min_ms, exec.max_ms
            )?;
        }
        if let Some(wait) = self.mean_queue_wait_ms {
            writeln!(f, "Mean queue wait:      {wait:.1} ms")?;
        }
        if let Some(eff) = self.mean_efficiency {
            writeln!(f, "Mean efficiency:      {eff:.3}")?;
        }

        writeln!(f)?;
        match &self.realtime_anomalies {
            Some(ids) => writeln!(f, "Real-time anomalies:  {} {:?}", ids.len(), ids)?,
            None => writeln!(f, "Real-time anomalies:  (no IsAnomaly column)")?,
        }
        writeln!(
            f,
            "Z-score anomalies:    {} {:?} (|z| > {})",
            self.zscore_anomalies.len(),
            self.zscore_anomalies,
            self.zscore_threshold
        )?;
        match &self.iqr {
            Some(fences) => writeln!(
                f,
                "IQR anomalies:        {} {:?} (outside {:.1}..{:.1} ms)",
                self.iqr_anomalies.len(),
                self.iqr_anomalies,
                fences.lower,
                fences.upper
            )?,
            None => writeln!(f, "IQR anomalies:        0")?,
        }

        writeln!(f)?;
        let a = &self.agreement;
        writeln!(f, "Agreement:")?;
        writeln!(f, "  real-time & z-score: {}", a.realtime_and_zscore.len())?;
        writeln!(f, "  real-time & IQR:     {}", a.realtime_and_iqr.len())?;
        writeln!(f, "  z-score & IQR:       {}", a.zscore_and_iqr.len())?;
        writeln!(f, "  all three:           {}", a.all_methods.len())
    }
}
