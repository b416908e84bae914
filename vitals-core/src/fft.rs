//! # Fast Fourier Transform (FFT) Module
//!
//! This module provides the spectral engine shared by every estimator: an
//! in-place radix-2 Cooley-Tukey transform, magnitude spectra, band-limited
//! peak search with sub-bin refinement and a peak-to-floor SNR estimate.
//!
//! ## Features
//! - Radix-2 decimation-in-time FFT (bit-reversal permutation, butterflies)
//! - Zero-padding of arbitrary-length windows to the next power of two
//! - Parabolic interpolation of the spectral peak
//! - SNR against the in-band floor, excluding the peak's neighbourhood
//!
//! The downstream physiological thresholds were tuned against this exact
//! transform, so it is implemented here rather than delegated to a planner.

use std::f64::consts::PI;

pub use rustfft::num_complex::Complex;

use crate::config::Band;
use crate::preprocess::{apply_hamming_window, remove_linear_trend, remove_mean};

/// Bins on each side of the peak left out of the noise floor.
const PEAK_GUARD_BINS: usize = 2;
/// Lowest frequency the coarse search considers; slower content is drift.
const COARSE_MIN_HZ: f64 = 0.5;
const COARSE_MAX_HZ: f64 = 4.0;
const MIN_SAMPLES: usize = 4;
/// Peaks below this are rounding residue of a flat window.
const MIN_PEAK_MAGNITUDE: f64 = 1e-9;

/// Dominant frequency found inside a search band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralResult {
    pub dominant_frequency_hz: f64,
    pub snr: f64,
    /// Integer bin of the peak before refinement.
    pub peak_bin: usize,
}

/// Performs an in-place forward FFT.
///
/// # Arguments
/// * `buffer` - Complex samples, replaced by their spectrum
///
/// # Panics
/// * If the length is not a power of two. Callers pad with
///   [`zero_padded`] first; any other length is a programming error.
pub fn fft_in_place(buffer: &mut [Complex<f64>]) {
    let n = buffer.len();
    assert!(
        n.is_power_of_two(),
        "FFT length must be a power of two, got {n}"
    );
    if n == 1 {
        return;
    }

    let levels = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - levels);
        if j > i {
            buffer.swap(i, j);
        }
    }

    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let phase_step = -2.0 * PI / size as f64;
        for start in (0..n).step_by(size) {
            for j in 0..half {
                let twiddle = Complex::from_polar(1.0, j as f64 * phase_step);
                let t = twiddle * buffer[start + j + half];
                buffer[start + j + half] = buffer[start + j] - t;
                buffer[start + j] += t;
            }
        }
        size <<= 1;
    }
}

/// Performs an in-place inverse FFT, including the `1/N` scaling.
///
/// # Panics
/// * If the length is not a power of two.
pub fn ifft_in_place(buffer: &mut [Complex<f64>]) {
    buffer.iter_mut().for_each(|c| *c = c.conj());
    fft_in_place(buffer);
    let scale = 1.0 / buffer.len() as f64;
    buffer.iter_mut().for_each(|c| *c = c.conj() * scale);
}

/// Copies a real signal into a complex buffer padded with zeros to the next
/// power of two.
pub fn zero_padded(signal: &[f64]) -> Vec<Complex<f64>> {
    let size = signal.len().max(1).next_power_of_two();
    let mut buffer = vec![Complex::new(0.0, 0.0); size];
    for (slot, &v) in buffer.iter_mut().zip(signal) {
        slot.re = v;
    }
    buffer
}

/// Calculates magnitudes of the first half of a spectrum (up to Nyquist).
///
/// # Arguments
/// * `spectrum` - Complex frequency spectrum from [`fft_in_place`]
///
/// # Returns
/// * `Vec<f64>` - `spectrum.len() / 2` magnitudes
pub fn magnitude_spectrum(spectrum: &[Complex<f64>]) -> Vec<f64> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Sub-bin offset of a peak from its two neighbours.
///
/// Returns `0.5 * (left - right) / (left - 2*center + right)`, or 0 when the
/// curvature is numerically negligible.
pub fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    0.5 * (left - right) / denom
}

/// Converts a frequency band to an inclusive range of usable bins.
///
/// Bin 0 (DC) is never part of a band. Returns `None` when the band does not
/// cover at least two bins.
pub fn band_bins(band: Band, resolution: f64, bin_count: usize) -> Option<(usize, usize)> {
    if bin_count < 2 || !(resolution > 0.0) {
        return None;
    }
    let min_bin = ((band.min_hz / resolution).floor() as usize).max(1);
    let max_bin = ((band.max_hz / resolution).ceil() as usize).min(bin_count - 1);
    (min_bin < max_bin).then_some((min_bin, max_bin))
}

/// Peak magnitude over the mean magnitude of the in-band floor.
///
/// Bins within two of the peak are excluded from the floor. Returns 0 when
/// no floor bins remain.
pub fn spectral_snr(magnitudes: &[f64], peak_bin: usize, min_bin: usize, max_bin: usize) -> f64 {
    let (sum, count) = (min_bin..=max_bin)
        .filter(|&i| i.abs_diff(peak_bin) > PEAK_GUARD_BINS)
        .filter_map(|i| magnitudes.get(i))
        .fold((0.0, 0usize), |(s, c), m| (s + m, c + 1));
    if count == 0 {
        return 0.0;
    }
    let floor = (sum / count as f64).max(1e-12);
    magnitudes.get(peak_bin).map_or(0.0, |peak| peak / floor)
}

/// Locates the refined dominant frequency of a magnitude spectrum in a band.
///
/// A band holding only numerical residue has no peak.
///
/// # Arguments
/// * `magnitudes` - Output of [`magnitude_spectrum`]
/// * `resolution` - Hz per bin, i.e. `sampling_freq / fft_size`
/// * `band` - Search band
pub fn peak_in_band(magnitudes: &[f64], resolution: f64, band: Band) -> Option<SpectralResult> {
    let (min_bin, max_bin) = band_bins(band, resolution, magnitudes.len())?;

    let mut peak_bin = min_bin;
    let mut peak_mag = 0.0;
    for (i, &m) in magnitudes.iter().enumerate().take(max_bin + 1).skip(min_bin) {
        if m > peak_mag {
            peak_mag = m;
            peak_bin = i;
        }
    }

    if peak_mag < MIN_PEAK_MAGNITUDE {
        return None;
    }

    let shift = if peak_bin > 0 && peak_bin + 1 < magnitudes.len() {
        parabolic_offset(
            magnitudes[peak_bin - 1],
            magnitudes[peak_bin],
            magnitudes[peak_bin + 1],
        )
    } else {
        0.0
    };

    let frequency = (peak_bin as f64 + shift) * resolution;
    if !frequency.is_finite() {
        return None;
    }
    Some(SpectralResult {
        dominant_frequency_hz: frequency,
        snr: spectral_snr(magnitudes, peak_bin, min_bin, max_bin),
        peak_bin,
    })
}

/// Finds the dominant frequency of a time-domain window.
///
/// The window is copied, detrended, Hamming-windowed, zero-padded to a power
/// of two and transformed; the strongest in-band bin is then refined.
///
/// # Arguments
/// * `samples` - Raw channel values, oldest first
/// * `sampling_freq` - Sampling frequency in Hz
/// * `band` - Physiological search band
///
/// # Returns
/// * `Option<SpectralResult>` - `None` for fewer than four samples, a
///   non-positive sampling frequency or a band narrower than two bins
pub fn find_dominant_frequency(
    samples: &[f64],
    sampling_freq: f64,
    band: Band,
) -> Option<SpectralResult> {
    if samples.len() < MIN_SAMPLES || !(sampling_freq > 0.0) {
        return None;
    }

    let mut x = samples.to_vec();
    remove_linear_trend(&mut x);
    apply_hamming_window(&mut x);

    let mut spectrum = zero_padded(&x);
    fft_in_place(&mut spectrum);
    let magnitudes = magnitude_spectrum(&spectrum);

    peak_in_band(&magnitudes, sampling_freq / spectrum.len() as f64, band)
}

/// Coarse dominant frequency without detrending or refinement.
///
/// Pads first, removes the mean and windows the whole padded buffer, then
/// takes the strongest bin at or above 0.5 Hz. Results outside 0.5..=4.0 Hz
/// are treated as noise.
pub fn coarse_dominant_frequency(samples: &[f64], sampling_freq: f64) -> Option<f64> {
    if samples.len() < MIN_SAMPLES || !(sampling_freq > 0.0) {
        return None;
    }

    let size = samples.len().next_power_of_two();
    let mut x = samples.to_vec();
    x.resize(size, 0.0);
    remove_mean(&mut x);
    apply_hamming_window(&mut x);

    let mut spectrum = zero_padded(&x);
    fft_in_place(&mut spectrum);

    let min_index = ((size as f64 * COARSE_MIN_HZ / sampling_freq).ceil() as usize).max(1);
    let (peak, _) = spectrum
        .iter()
        .enumerate()
        .take(size / 2)
        .skip(min_index)
        .map(|(i, c)| (i, c.norm()))
        .fold((0usize, 0.0), |best, (i, m)| if m > best.1 { (i, m) } else { best });

    let frequency = peak as f64 * sampling_freq / size as f64;
    (COARSE_MIN_HZ..=COARSE_MAX_HZ)
        .contains(&frequency)
        .then_some(frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CARDIAC_BAND;
    use crate::synthetic::sinusoid;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rustfft::FftPlanner;

    #[test]
    fn matches_reference_fft() {
        let signal: Vec<f64> = (0..64)
            .map(|i| (i as f64 * 0.3).sin() + 0.5 * (i as f64 * 1.7).cos() + 0.1 * i as f64)
            .collect();
        let mut ours = zero_padded(&signal);
        fft_in_place(&mut ours);

        let mut reference = zero_padded(&signal);
        FftPlanner::new().plan_fft_forward(64).process(&mut reference);

        for (a, b) in ours.iter().zip(&reference) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-9);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-9);
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_panics() {
        let mut buffer = vec![Complex::new(1.0, 0.0); 12];
        fft_in_place(&mut buffer);
    }

    #[test]
    fn pads_to_next_power_of_two() {
        assert_eq!(zero_padded(&[1.0; 100]).len(), 128);
        assert_eq!(zero_padded(&[1.0; 128]).len(), 128);
        assert_eq!(zero_padded(&[]).len(), 1);
    }

    #[test]
    fn parabola_recovers_vertex() {
        // y = -(x - 0.3)^2 sampled at -1, 0, 1
        let f = |x: f64| -(x - 0.3).powi(2);
        assert_abs_diff_eq!(parabolic_offset(f(-1.0), f(0.0), f(1.0)), 0.3, epsilon = 1e-12);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn snr_excludes_peak_neighbourhood() {
        let mut mags = vec![1.0; 20];
        mags[10] = 10.0;
        mags[9] = 8.0;
        mags[11] = 8.0;
        assert_abs_diff_eq!(spectral_snr(&mags, 10, 1, 19), 10.0);
        // Band entirely inside the guard region.
        assert_eq!(spectral_snr(&mags, 10, 8, 12), 0.0);
    }

    #[test]
    fn finds_sinusoid_in_band() {
        let fs = 30.0;
        let mut rng = StdRng::seed_from_u64(3);
        let signal: Vec<f64> = sinusoid(1.2, fs, 300, 2.0, 100.0)
            .into_iter()
            .map(|v| v + rng.gen_range(-1.0..1.0))
            .collect();
        let result = find_dominant_frequency(&signal, fs, CARDIAC_BAND).unwrap();
        let resolution = fs / 512.0;
        assert!((result.dominant_frequency_hz - 1.2).abs() < resolution);
        assert!(result.snr > 4.0, "snr {}", result.snr);
    }

    #[test]
    fn rejects_short_or_degenerate_input() {
        assert!(find_dominant_frequency(&[1.0, 2.0, 3.0], 30.0, CARDIAC_BAND).is_none());
        assert!(find_dominant_frequency(&[1.0; 64], 0.0, CARDIAC_BAND).is_none());
        assert!(find_dominant_frequency(&[1.0; 8], 30.0, Band::new(1.0, 1.1)).is_none());
        assert!(find_dominant_frequency(&[80.0; 300], 30.0, CARDIAC_BAND).is_none());
    }

    #[test]
    fn coarse_search_ignores_drift() {
        let fs = 30.0;
        let slow = sinusoid(0.2, fs, 512, 5.0, 0.0);
        let pulse = sinusoid(1.5, fs, 512, 1.0, 0.0);
        let mixed: Vec<f64> = slow.iter().zip(&pulse).map(|(a, b)| a + b).collect();
        let f = coarse_dominant_frequency(&mixed, fs).unwrap();
        assert_relative_eq!(f, 1.5, epsilon = fs / 512.0);

        let fast = sinusoid(6.0, fs, 512, 1.0, 0.0);
        assert!(coarse_dominant_frequency(&fast, fs).is_none());
    }

    proptest! {
        #[test]
        fn inverse_reconstructs_signal(
            exp in 0u32..9,
            seed in proptest::collection::vec(-1000.0f64..1000.0, 256),
        ) {
            let n = 1usize << exp;
            let original: Vec<f64> = seed[..n].to_vec();
            let mut buffer = zero_padded(&original);
            fft_in_place(&mut buffer);
            ifft_in_place(&mut buffer);
            for (c, &x) in buffer.iter().zip(&original) {
                prop_assert!((c.re - x).abs() < 1e-7);
                prop_assert!(c.im.abs() < 1e-7);
            }
        }
    }
}
