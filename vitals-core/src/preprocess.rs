//! # Preprocessing Module
//!
//! Conditioning applied to a copy of a sample window before spectral or
//! autocorrelation analysis. Nothing here touches the sample buffer itself.

use std::f64::consts::PI;

use linreg::linear_regression;

/// Removes the least-squares line through `(index, value)` in place.
///
/// When the fit is degenerate (fewer than two samples) the data is left
/// unchanged.
pub fn remove_linear_trend(samples: &mut [f64]) {
    if samples.len() < 2 {
        return;
    }
    let xs: Vec<f64> = (0..samples.len()).map(|i| i as f64).collect();
    let Ok((slope, intercept)) = linear_regression::<f64, f64, f64>(&xs, samples) else {
        return;
    };
    if !slope.is_finite() || !intercept.is_finite() {
        return;
    }
    for (i, v) in samples.iter_mut().enumerate() {
        *v -= slope * i as f64 + intercept;
    }
}

/// Applies a Hamming window `0.54 - 0.46 * cos(2*pi*i / (N - 1))` in place.
pub fn apply_hamming_window(samples: &mut [f64]) {
    let n = samples.len();
    if n < 2 {
        return;
    }
    let denom = (n - 1) as f64;
    for (i, v) in samples.iter_mut().enumerate() {
        *v *= 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos();
    }
}

/// Subtracts the arithmetic mean in place and returns it.
pub fn remove_mean(samples: &mut [f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = mean(samples);
    samples.iter_mut().for_each(|v| *v -= mean);
    mean
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation.
pub fn std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let m = mean(samples);
    let var = samples.iter().map(|v| (v - m).powi(2)).sum::<f64>() / samples.len() as f64;
    var.sqrt()
}

pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|v| v * v).sum::<f64>() / samples.len() as f64).sqrt()
}

/// Median of a slice; the mean of the two middle elements for even lengths.
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        0.5 * (sorted[mid - 1] + sorted[mid])
    }
}

/// Median absolute deviation from the median.
pub fn median_abs_deviation(samples: &[f64]) -> f64 {
    let m = median(samples);
    let deviations: Vec<f64> = samples.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}
