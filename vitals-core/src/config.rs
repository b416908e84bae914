//! # Configuration Module
//!
//! Every threshold, timing and calibration constant used by the engine lives
//! here with its default value. Configurations are plain serde structures so
//! a JSON file may override any subset of fields.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::profile::MealTiming;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub extractor: ExtractorConfig,
    pub buffer: BufferConfig,
    pub heart_rate: HeartRateConfig,
    pub respiration: RespirationConfig,
    pub spo2: Spo2Config,
    pub blood_pressure: BloodPressureConfig,
    pub glucose: GlucoseConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid engine configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Acquisition timing shared by all vital signs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub min_frames: usize,
}

impl Timing {
    pub const fn new(min_seconds: f64, max_seconds: f64, min_frames: usize) -> Self {
        Self {
            min_seconds,
            max_seconds,
            min_frames,
        }
    }

    pub fn min_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Frequency band in Hz, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min_hz: f64,
    pub max_hz: f64,
}

impl Band {
    pub const fn new(min_hz: f64, max_hz: f64) -> Self {
        Self { min_hz, max_hz }
    }

    pub fn contains(&self, hz: f64) -> bool {
        hz >= self.min_hz && hz <= self.max_hz
    }
}

/// Cardiac band: 0.7 to 4.0 Hz, i.e. 42 to 240 bpm.
pub const CARDIAC_BAND: Band = Band::new(0.7, 4.0);
/// Respiratory band: 0.08 to 0.6 Hz, roughly 4.8 to 36 breaths per minute.
pub const RESPIRATORY_BAND: Band = Band::new(0.08, 0.6);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub smoothing_window: usize,
    pub reference_luminance: f64,
    pub min_red: f64,
    pub max_red: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 8,
            reference_luminance: 128.0,
            min_red: 30.0,
            max_red: 230.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Hard ceiling on buffered samples; the oldest are evicted beyond it.
    pub max_samples: usize,
    /// Elapsed time before the sampling-frequency estimate is trusted.
    pub warmup_seconds: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_samples: 4096,
            warmup_seconds: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    pub timing: Timing,
    pub band: Band,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub snr_threshold: f64,
    /// Weight of the newest reading in the exponential moving average.
    pub ema_alpha: f64,
    pub history_len: usize,
    pub stable_delta: f64,
    pub stable_count: usize,
    pub min_channel_level: f64,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            timing: Timing::new(8.0, 30.0, 40),
            band: CARDIAC_BAND,
            min_bpm: 40.0,
            max_bpm: 200.0,
            snr_threshold: 4.0,
            ema_alpha: 0.45,
            history_len: 6,
            stable_delta: 3.0,
            stable_count: 3,
            min_channel_level: 35.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespirationConfig {
    pub timing: Timing,
    pub band: Band,
    pub min_rpm: f64,
    pub max_rpm: f64,
    /// Minimum normalized autocorrelation accepted as a breathing period.
    pub autocorr_threshold: f64,
    /// Minimum energy-to-noise ratio for trusting the autocorrelation alone.
    pub energy_ratio_threshold: f64,
    /// Relative difference under which both estimates are averaged.
    pub agreement_tolerance: f64,
    pub min_channel_level: f64,
}

impl Default for RespirationConfig {
    fn default() -> Self {
        Self {
            timing: Timing::new(20.0, 60.0, 30),
            band: RESPIRATORY_BAND,
            min_rpm: 6.0,
            max_rpm: 40.0,
            autocorr_threshold: 0.15,
            energy_ratio_threshold: 0.4,
            agreement_tolerance: 0.20,
            min_channel_level: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Spo2Config {
    pub timing: Timing,
    pub band: Band,
    pub snr_threshold: f64,
    /// Combined SNR must reach `snr_threshold / snr_leniency`.
    pub snr_leniency: f64,
    pub flat_ratio: f64,
    pub noisy_ratio: f64,
    /// Linear calibration `SpO2 = a - b * R`.
    pub calibration_a: f64,
    pub calibration_b: f64,
    pub min_percent: f64,
    pub max_percent: f64,
    pub min_pulse_bpm: f64,
    pub max_pulse_bpm: f64,
    pub smoothing_window: usize,
    pub min_channel_level: f64,
}

impl Default for Spo2Config {
    fn default() -> Self {
        Self {
            timing: Timing::new(12.0, 60.0, 30),
            band: CARDIAC_BAND,
            snr_threshold: 4.0,
            snr_leniency: 1.5,
            flat_ratio: 0.002,
            noisy_ratio: 0.25,
            calibration_a: 110.0,
            calibration_b: 25.0,
            min_percent: 60.0,
            max_percent: 100.0,
            min_pulse_bpm: 30.0,
            max_pulse_bpm: 220.0,
            smoothing_window: 3,
            min_channel_level: 30.0,
        }
    }
}

/// Coefficients of the pulse-wave-analysis pressure model.
///
/// These are empirical and carry no calibration source; treat them as
/// tunable defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureModelConfig {
    pub et_intercept: f64,
    pub et_slope: f64,
    pub sv_intercept: f64,
    pub sv_et_coeff: f64,
    pub sv_et_offset: f64,
    pub sv_hr_coeff: f64,
    pub sv_bsa_coeff: f64,
    pub sv_age_coeff: f64,
    pub pp_weight_coeff: f64,
    pub pp_age_coeff: f64,
    pub pp_hr_coeff: f64,
    pub pp_offset: f64,
    pub q_male: f64,
    pub q_female: f64,
    pub peripheral_resistance: f64,
    pub min_stroke_volume: f64,
    pub default_pulse_pressure: f64,
    pub multiplier: f64,
}

impl Default for PressureModelConfig {
    fn default() -> Self {
        Self {
            et_intercept: 364.5,
            et_slope: 1.23,
            sv_intercept: -6.6,
            sv_et_coeff: 0.25,
            sv_et_offset: 35.0,
            sv_hr_coeff: 0.62,
            sv_bsa_coeff: 40.4,
            sv_age_coeff: 0.51,
            pp_weight_coeff: 0.013,
            pp_age_coeff: 0.007,
            pp_hr_coeff: 0.004,
            pp_offset: 1.307,
            q_male: 5.0,
            q_female: 4.5,
            peripheral_resistance: 18.5,
            min_stroke_volume: 20.0,
            default_pulse_pressure: 30.0,
            multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloodPressureConfig {
    pub timing: Timing,
    pub band: Band,
    pub min_hr: f64,
    pub max_hr: f64,
    pub snr_threshold: f64,
    pub history_len: usize,
    pub systolic_range: (f64, f64),
    pub diastolic_range: (f64, f64),
    pub min_confidence: f64,
    pub min_channel_level: f64,
    pub model: PressureModelConfig,
}

impl Default for BloodPressureConfig {
    fn default() -> Self {
        Self {
            timing: Timing::new(12.0, 30.0, 40),
            band: CARDIAC_BAND,
            min_hr: 40.0,
            max_hr: 200.0,
            snr_threshold: 4.0,
            history_len: 6,
            systolic_range: (70.0, 260.0),
            diastolic_range: (40.0, 180.0),
            min_confidence: 0.45,
            min_channel_level: 35.0,
            model: PressureModelConfig::default(),
        }
    }
}

/// Linear mapping of a raw infrared level onto the glucose scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrMapping {
    pub slope: f64,
    pub intercept: f64,
    pub correction: f64,
}

impl Default for IrMapping {
    fn default() -> Self {
        Self {
            slope: 0.5,
            intercept: 70.0,
            correction: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlucoseConfig {
    pub timing: Timing,
    pub band: Band,
    pub meal: MealTiming,
    /// Red-channel pulse must reach this SNR and lie within
    /// `min_bpm..=max_bpm` before it feeds the curves.
    pub snr_threshold: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub smoothing_window: usize,
    pub red_range: (f64, f64),
    pub bpm_range: (f64, f64),
    pub output_range: (f64, f64),
    pub initial_stable_value: f64,
    /// Red-channel curve output within this distance of the last stable
    /// value counts as steady.
    pub steady_delta: f64,
    pub steady_red_weight: f64,
    pub unsteady_red_weight: f64,
    /// Weight kept from the previous stable value when blending.
    pub history_blend: f64,
    pub min_channel_level: f64,
    pub infrared: IrMapping,
}

impl Default for GlucoseConfig {
    fn default() -> Self {
        Self {
            timing: Timing::new(15.0, 30.0, 40),
            band: CARDIAC_BAND,
            meal: MealTiming::Fasting,
            snr_threshold: 4.0,
            min_bpm: 40.0,
            max_bpm: 200.0,
            smoothing_window: 10,
            red_range: (50.0, 200.0),
            bpm_range: (50.0, 180.0),
            output_range: (70.0, 180.0),
            initial_stable_value: 100.0,
            steady_delta: 5.0,
            steady_red_weight: 0.7,
            unsteady_red_weight: 0.5,
            history_blend: 0.6,
            min_channel_level: 50.0,
            infrared: IrMapping::default(),
        }
    }
}
