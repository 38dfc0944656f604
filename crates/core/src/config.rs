use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for a triage scheduler.
///
/// Parsed from TOML with support for environment variable overrides.
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Worker pool section.
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Anomaly detector section.
    #[serde(default)]
    pub detector: DetectorConfig,
}

// ── Section configs ───────────────────────────────────────────

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Number of worker threads started by `start_configured`.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_worker_threads() -> usize {
    4
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

/// Rolling-window anomaly detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of recent execution durations kept in the window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Absolute z-score above which a duration is anomalous.
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    /// Minimum window fill before anything can be flagged.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_window_size() -> usize {
    50
}

fn default_z_threshold() -> f64 {
    2.0
}

fn default_min_samples() -> usize {
    10
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            z_threshold: default_z_threshold(),
            min_samples: default_min_samples(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(TriageError::InvalidConfig(
                "detector.window_size must be positive".into(),
            ));
        }
        if !self.z_threshold.is_finite() || self.z_threshold <= 0.0 {
            return Err(TriageError::InvalidConfig(format!(
                "detector.z_threshold must be a positive number, got {}",
                self.z_threshold
            )));
        }
        // A window smaller than min_samples is allowed; it never flags.
        if self.min_samples == 0 {
            return Err(TriageError::InvalidConfig(
                "detector.min_samples must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ── Loading & Validation ──────────────────────────────────────

impl TriageConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `TRIAGE_SECTION_KEY` overrides `section.key`.
    /// - `TRIAGE_WORKER_THREADS` → `scheduler.worker_threads`
    /// - `TRIAGE_DETECTOR_WINDOW_SIZE` → `detector.window_size`
    /// - `TRIAGE_DETECTOR_Z_THRESHOLD` → `detector.z_threshold`
    /// - `TRIAGE_DETECTOR_MIN_SAMPLES` → `detector.min_samples`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "TRIAGE_WORKER_THREADS") {
            self.scheduler.worker_threads = v;
        }
        if let Some(v) = parsed(&lookup, "TRIAGE_DETECTOR_WINDOW_SIZE") {
            self.detector.window_size = v;
        }
        if let Some(v) = parsed(&lookup, "TRIAGE_DETECTOR_Z_THRESHOLD") {
            self.detector.z_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "TRIAGE_DETECTOR_MIN_SAMPLES") {
            self.detector.min_samples = v;
        }
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.worker_threads == 0 {
            return Err(TriageError::InvalidConfig(
                "scheduler.worker_threads must be positive".into(),
            ));
        }
        self.detector.validate()
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  scheduler:  worker_threads={}", self.scheduler.worker_threads);
        tracing::info!(
            "  detector:   window_size={}, z_threshold={}, min_samples={}",
            self.detector.window_size,
            self.detector.z_threshold,
            self.detector.min_samples
        );
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).filter(|s| !s.is_empty())?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}
