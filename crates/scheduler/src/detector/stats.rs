//! Window statistics for the anomaly detector.

/// Mean and population standard deviation of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Compute mean and population standard deviation in two passes.
///
/// Returns `None` for an empty sample. The second pass sums squared
/// deviations from the mean instead of using `E[x²] - E[x]²`, so identical
/// samples give a standard deviation of exactly zero.
pub fn window_stats(samples: &[f64]) -> Option<WindowStats> {
    if samples.is_empty() {
        return None;
    }

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|x| {
            let diff = x - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;

    Some(WindowStats {
        mean,
        std_dev: variance.sqrt(),
    })
}
