//! # Vital Estimators
//!
//! One estimator per vital sign, all driven by the same session controller
//! through the [`VitalEstimator`] trait. Each estimator owns its smoothing
//! histories and decides, per analysis attempt, whether the buffered window
//! yields a candidate, a final result, or a rejection.

pub mod blood_pressure;
pub mod glucose;
pub mod heart_rate;
pub mod respiration;
pub mod spo2;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::SampleBuffer;
use crate::channel::ChannelSample;
use crate::config::{Band, EngineConfig, Timing};
use crate::profile::AnthropometricProfile;
use crate::vital::{Measurement, VitalKind};

pub use blood_pressure::{BloodPressureEstimator, PressureEstimate, PressureModel};
pub use glucose::{GlucoseEstimator, GlucoseModel, IrCalibration};
pub use heart_rate::HeartRateEstimator;
pub use respiration::RespirationEstimator;
pub use spo2::Spo2Estimator;

/// Why an analysis attempt did not produce an acceptable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// No spectral or autocorrelation peak inside the band.
    NoPeak,
    LowSnr { snr: f64, threshold: f64 },
    OutOfRange { value: f64, min: f64, max: f64 },
    NonFinite,
    TooFlat { ratio: f64 },
    TooNoisy { ratio: f64 },
    WeakSignal,
    LowConfidence { confidence: f64 },
    /// Not enough samples in the trimmed window.
    InsufficientData { samples: usize, needed: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoPeak => write!(f, "no peak in band"),
            Rejection::LowSnr { snr, threshold } => {
                write!(f, "snr {snr:.2} below {threshold:.2}")
            }
            Rejection::OutOfRange { value, min, max } => {
                write!(f, "{value:.1} outside [{min}, {max}]")
            }
            Rejection::NonFinite => write!(f, "non-finite value"),
            Rejection::TooFlat { ratio } => write!(f, "signal too flat (std/mean {ratio:.4})"),
            Rejection::TooNoisy { ratio } => write!(f, "signal too noisy (std/mean {ratio:.3})"),
            Rejection::WeakSignal => write!(f, "signal too weak"),
            Rejection::LowConfidence { confidence } => {
                write!(f, "confidence {confidence:.2} too low")
            }
            Rejection::InsufficientData { samples, needed } => {
                write!(f, "{samples} samples, need {needed}")
            }
        }
    }
}

/// Outcome of one analysis attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Plausible value, but acquisition continues.
    Candidate { value: f64, snr: f64 },
    Final(Measurement),
    /// Keep collecting; the buffer is left as is.
    Reject(Rejection),
    /// Discard everything collected so far and restart the timer.
    Restart(Rejection),
}

/// What an estimator sees when asked to analyze.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub buffer: &'a SampleBuffer,
    pub sampling_freq: f64,
    pub elapsed: Duration,
    /// The maximum collection window has been reached; this is the last
    /// attempt before the session fails.
    pub deadline_reached: bool,
}

impl AnalysisContext<'_> {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Per-vital behaviour plugged into the generic session controller.
pub trait VitalEstimator {
    fn kind(&self) -> VitalKind;

    fn timing(&self) -> Timing;

    fn band(&self) -> Band;

    fn min_duration(&self) -> Duration {
        self.timing().min_duration()
    }

    fn max_duration(&self) -> Duration {
        self.timing().max_duration()
    }

    fn min_frames(&self) -> usize {
        self.timing().min_frames
    }

    /// Finger-contact gate applied before a sample enters the buffer.
    fn accepts(&self, sample: &ChannelSample) -> bool;

    /// Number of newest samples to keep before analysis.
    fn window_len(&self, sampling_freq: f64, elapsed: Duration) -> usize;

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict;

    /// Clears all smoothing state, as if freshly constructed.
    fn reset(&mut self);
}

/// Closed set of estimators, selected by [`VitalKind`].
#[derive(Debug, Clone)]
pub enum Estimator {
    HeartRate(HeartRateEstimator),
    Respiration(RespirationEstimator),
    Spo2(Spo2Estimator),
    BloodPressure(BloodPressureEstimator),
    Glucose(GlucoseEstimator),
}

impl Estimator {
    pub fn new(kind: VitalKind, config: &EngineConfig, profile: AnthropometricProfile) -> Self {
        match kind {
            VitalKind::HeartRate => Estimator::HeartRate(HeartRateEstimator::new(config.heart_rate.clone())),
            VitalKind::Respiration => {
                Estimator::Respiration(RespirationEstimator::new(config.respiration.clone()))
            }
            VitalKind::Spo2 => Estimator::Spo2(Spo2Estimator::new(config.spo2.clone())),
            VitalKind::BloodPressure => Estimator::BloodPressure(BloodPressureEstimator::new(
                config.blood_pressure.clone(),
                profile,
            )),
            VitalKind::Glucose => Estimator::Glucose(GlucoseEstimator::new(config.glucose.clone())),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $e:ident => $body:expr) => {
        match $self {
            Estimator::HeartRate($e) => $body,
            Estimator::Respiration($e) => $body,
            Estimator::Spo2($e) => $body,
            Estimator::BloodPressure($e) => $body,
            Estimator::Glucose($e) => $body,
        }
    };
}

impl VitalEstimator for Estimator {
    fn kind(&self) -> VitalKind {
        dispatch!(self, e => e.kind())
    }

    fn timing(&self) -> Timing {
        dispatch!(self, e => e.timing())
    }

    fn band(&self) -> Band {
        dispatch!(self, e => e.band())
    }

    fn accepts(&self, sample: &ChannelSample) -> bool {
        dispatch!(self, e => e.accepts(sample))
    }

    fn window_len(&self, sampling_freq: f64, elapsed: Duration) -> usize {
        dispatch!(self, e => e.window_len(sampling_freq, elapsed))
    }

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict {
        dispatch!(self, e => e.analyze(ctx))
    }

    fn reset(&mut self) {
        dispatch!(self, e => e.reset())
    }
}

/// Samples covering `seconds` at `sampling_freq`, never below `min_frames`.
/// Rates under 1 Hz are treated as 1 Hz.
pub(crate) fn frames_for(seconds: f64, sampling_freq: f64, min_frames: usize) -> usize {
    let frames = (seconds * sampling_freq.max(1.0)).round();
    if frames.is_finite() && frames > 0.0 {
        (frames as usize).max(min_frames)
    } else {
        min_frames
    }
}

/// Upper-middle element of the sorted values, as used for reading histories.
pub(crate) fn history_median<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().copied().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted[sorted.len() / 2])
}
