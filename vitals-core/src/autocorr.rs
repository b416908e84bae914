//! # Autocorrelation Module
//!
//! Period detection in the lag domain, used where the window holds only a
//! handful of cycles and bin spacing is too coarse (respiration).
//!
//! ## Features
//! - Unbiased autocorrelation normalized by the zero-lag energy
//! - First-peak selection above a clarity threshold to avoid multiples
//! - Parabolic interpolation for sub-sample lag accuracy

use crate::config::Band;
use crate::fft::parabolic_offset;

/// A period found in the lag domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutocorrResult {
    pub frequency_hz: f64,
    /// Refined lag in samples.
    pub lag: f64,
    /// Normalized autocorrelation at the integer peak lag.
    pub peak: f64,
}

/// Normalized autocorrelation for lags `0..=max_lag`.
///
/// Each lag is averaged over its `n - lag` overlapping products, then the
/// whole sequence is divided by the zero-lag value. Returns `None` for a
/// silent signal.
pub fn normalized_autocorrelation(signal: &[f64], max_lag: usize) -> Option<Vec<f64>> {
    let n = signal.len();
    if n == 0 {
        return None;
    }
    let max_lag = max_lag.min(n - 1);
    let mut acorr: Vec<f64> = (0..=max_lag)
        .map(|lag| {
            let sum: f64 = signal[..n - lag]
                .iter()
                .zip(&signal[lag..])
                .map(|(a, b)| a * b)
                .sum();
            sum / (n - lag) as f64
        })
        .collect();

    let energy = acorr[0];
    if !(energy > 1e-12) {
        return None;
    }
    acorr.iter_mut().for_each(|v| *v /= energy);
    Some(acorr)
}

/// Finds the fundamental period of a signal within a frequency band.
///
/// # Arguments
/// * `signal` - Conditioned (zero-mean) samples
/// * `sampling_freq` - Sampling frequency in Hz
/// * `band` - Accepted frequency band; lags outside it are not searched
/// * `min_peak` - Minimum normalized autocorrelation of an accepted peak
///
/// # Returns
/// * `Some(result)` - The first local maximum above `min_peak`, refined
/// * `None` - No qualifying peak, or the refined frequency left the band
pub fn find_period(
    signal: &[f64],
    sampling_freq: f64,
    band: Band,
    min_peak: f64,
) -> Option<AutocorrResult> {
    let n = signal.len();
    if n < 3 || !(sampling_freq > 0.0) || !(band.min_hz > 0.0) || band.max_hz <= band.min_hz {
        return None;
    }

    // --- Step 1: Lag range from the frequency band ---
    let max_lag = ((sampling_freq / band.min_hz).floor() as usize).min(n - 1);
    let min_lag = ((sampling_freq / band.max_hz).floor() as usize).max(1);
    if min_lag >= max_lag {
        return None;
    }

    let acorr = normalized_autocorrelation(signal, max_lag)?;

    // --- Step 2: First local maximum above the clarity threshold ---
    let lag = (min_lag.max(1)..max_lag).find(|&lag| {
        let v = acorr[lag];
        v > min_peak && v > acorr[lag - 1] && v > acorr[lag + 1]
    })?;

    // --- Step 3: Parabolic refinement ---
    let refined = lag as f64 + parabolic_offset(acorr[lag - 1], acorr[lag], acorr[lag + 1]);
    let frequency = sampling_freq / refined;

    if frequency.is_finite() && band.contains(frequency) {
        Some(AutocorrResult {
            frequency_hz: frequency,
            lag: refined,
            peak: acorr[lag],
        })
    } else {
        None
    }
}
