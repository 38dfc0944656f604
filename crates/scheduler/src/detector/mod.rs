//! Streaming latency anomaly detection.
//!
//! The detector keeps the most recent execution durations in a fixed-size
//! window and classifies each new duration by its z-score against the
//! window. It is cheap (O(window) per observation) and needs no training.
//!
//! Sub-modules:
//! - [`window`]: the FIFO-evicting rolling window
//! - [`stats`]: mean / population standard deviation

pub mod stats;
pub mod window;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use triage_core::DetectorConfig;

use crate::error::Result;

pub use stats::{WindowStats, window_stats};
pub use window::RollingWindow;

/// Thread-safe handle to a detector shared by all workers.
pub type SharedDetector = Arc<Mutex<AnomalyDetector>>;

/// Outcome of scoring one duration against the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub is_anomaly: bool,
    /// `(duration - mean) / std_dev`, when the window is warm and has spread.
    pub z_score: Option<f64>,
    pub mean: f64,
    pub std_dev: f64,
    /// Window length after the observation was appended.
    pub samples: usize,
}

/// Rolling-window z-score classifier for execution durations (milliseconds).
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    window: RollingWindow<f64>,
    z_threshold: f64,
    min_samples: usize,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        let config = DetectorConfig::default();
        Self {
            window: RollingWindow::new(config.window_size),
            z_threshold: config.z_threshold,
            min_samples: config.min_samples,
        }
    }
}

impl AnomalyDetector {
    /// Create a detector, rejecting invalid window/threshold settings.
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window: RollingWindow::new(config.window_size),
            z_threshold: config.z_threshold,
            min_samples: config.min_samples,
        })
    }

    /// Wrap a detector for sharing across worker threads.
    pub fn shared(self) -> SharedDetector {
        Arc::new(Mutex::new(self))
    }

    /// Append a duration and report whether it is an outlier.
    pub fn observe(&mut self, duration_ms: f64) -> bool {
        self.score(duration_ms).is_anomaly
    }

    /// Append a duration and return the full scoring detail.
    ///
    /// The duration joins the window before the statistics are computed.
    /// Nothing is flagged until the window holds `min_samples` entries, and a
    /// window without spread never flags.
    pub fn score(&mut self, duration_ms: f64) -> Observation {
        self.window.push(duration_ms);
        let samples = self.window.len();

        let Some(WindowStats { mean, std_dev }) = window_stats(self.window.as_slice()) else {
            return Observation {
                is_anomaly: false,
                z_score: None,
                mean: 0.0,
                std_dev: 0.0,
                samples,
            };
        };

        let z_score = if samples >= self.min_samples && std_dev > f64::EPSILON {
            Some((duration_ms - mean) / std_dev)
        } else {
            None
        };

        Observation {
            is_anomaly: z_score.is_some_and(|z| z.abs() > self.z_threshold),
            z_score,
            mean,
            std_dev,
            samples,
        }
    }

    /// Number of durations currently in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Maximum window length.
    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn z_threshold(&self) -> f64 {
        self.z_threshold
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Window contents, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }

    /// Mean and standard deviation of the current window.
    pub fn stats(&self) -> Option<WindowStats> {
        window_stats(&self.samples())
    }

    /// Mean of the current window, `None` while empty.
    pub fn mean(&self) -> Option<f64> {
        self.stats().map(|s| s.mean)
    }

    /// Population standard deviation of the current window.
    pub fn std_dev(&self) -> Option<f64> {
        self.stats().map(|s| s.std_dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;

    fn seeded(value: f64, count: usize) -> AnomalyDetector {
        let mut d = AnomalyDetector::default();
        for _ in 0..count {
            d.observe(value);
        }
        d
    }

    #[test]
    fn insufficient_samples_never_flag() {
        let mut d = AnomalyDetector::default();
        let durations = [1.0, 1000.0, 1.0, 5000.0, 1.0, 9000.0, 1.0, 1.0, 100_000.0];
        for (i, ms) in durations.iter().enumerate() {
            let obs = d.score(*ms);
            assert!(
                !obs.is_anomaly,
                "sample {i} flagged with only {} samples",
                obs.samples
            );
            assert_eq!(obs.z_score, None);
        }
        assert_eq!(d.len(), 9);
    }

    #[test]
    fn repeated_large_values_below_min_samples() {
        let mut d = AnomalyDetector::default();
        for _ in 0..9 {
            assert!(!d.observe(1000.0));
        }
    }

    #[test]
    fn outlier_flagged_then_normal_sample_not() {
        let mut d = seeded(100.0, 20);
        assert!(d.observe(400.0), "400ms after 20x100ms should be anomalous");
        assert!(!d.observe(105.0), "105ms should be normal");
    }

    #[test]
    fn outlier_z_score_reported() {
        let mut d = seeded(100.0, 20);
        let obs = d.score(400.0);
        assert_eq!(obs.samples, 21);
        let z = obs.z_score.unwrap();
        // A lone outlier among 21 samples has z = sqrt(20).
        assert!((z - 20f64.sqrt()).abs() < 1e-6, "z = {z}");
    }

    #[test]
    fn zero_variance_is_not_anomalous() {
        let mut d = seeded(100.0, 15);
        let obs = d.score(100.0);
        assert!(!obs.is_anomaly);
        assert_eq!(obs.z_score, None);
        assert_eq!(obs.std_dev, 0.0);
    }

    #[test]
    fn fast_outlier_below_mean_is_flagged() {
        let mut d = AnomalyDetector::default();
        for i in 0..30 {
            d.observe(if i % 2 == 0 { 100.0 } else { 110.0 });
        }
        assert!(d.observe(0.0));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut d = AnomalyDetector::default();
        let window = d.capacity();
        // Five huge values first, then `window` ordinary ones.
        for _ in 0..5 {
            d.observe(10_000.0);
        }
        for i in 0..window {
            d.observe(100.0 + (i % 2) as f64);
        }
        assert_eq!(d.len(), window);
        assert!(d.samples().iter().all(|&v| v < 1000.0));
        let stats = d.stats().unwrap();
        assert!((stats.mean - 100.5).abs() < 1e-9, "mean = {}", stats.mean);
        assert_eq!(d.mean(), Some(stats.mean));
        assert!((d.std_dev().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_detector_has_no_stats() {
        let d = AnomalyDetector::default();
        assert!(d.is_empty());
        assert_eq!(d.mean(), None);
        assert_eq!(d.std_dev(), None);
    }

    #[test]
    fn custom_threshold_changes_sensitivity() {
        let config = DetectorConfig {
            window_size: 20,
            z_threshold: 5.0,
            min_samples: 10,
        };
        let mut d = AnomalyDetector::new(&config).unwrap();
        for _ in 0..19 {
            d.observe(100.0);
        }
        // z = sqrt(19) ≈ 4.36 for a single outlier in a window of 20
        assert!(!d.observe(400.0));
    }

    #[test]
    fn custom_min_samples() {
        let config = DetectorConfig {
            window_size: 10,
            z_threshold: 2.0,
            min_samples: 3,
        };
        let mut d = AnomalyDetector::new(&config).unwrap();
        for _ in 0..5 {
            d.observe(100.0);
        }
        // A lone outlier among n samples has |z| = sqrt(n - 1).
        assert!(d.observe(1000.0));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = DetectorConfig {
            window_size: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            AnomalyDetector::new(&config),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn window_smaller_than_min_samples_never_flags() {
        let config = DetectorConfig {
            window_size: 5,
            ..DetectorConfig::default()
        };
        let mut d = AnomalyDetector::new(&config).unwrap();
        for _ in 0..20 {
            assert!(!d.observe(100.0));
        }
        let obs = d.score(100_000.0);
        assert!(!obs.is_anomaly);
        assert!(obs.z_score.is_none());
        assert_eq!(obs.samples, 5);
        assert_eq!(d.len(), 5);
    }

    #[test]
    fn shared_detector_linearizes_updates() {
        let shared = AnomalyDetector::default().shared();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let d = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        d.lock().unwrap().observe((t * 100 + i) as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let d = shared.lock().unwrap();
        assert_eq!(d.len(), d.capacity());
    }
}
