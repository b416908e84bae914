use std::collections::VecDeque;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use super::heart_rate::PulseGate;
use super::{AnalysisContext, Rejection, Verdict, VitalEstimator, frames_for, history_median};
use crate::channel::ChannelSample;
use crate::config::{Band, BloodPressureConfig, PressureModelConfig, Timing};
use crate::profile::AnthropometricProfile;
use crate::vital::{Measurement, Quality, VitalKind, VitalValue};

/// Every intermediate of the pressure model, for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureEstimate {
    /// Ejection time in ms.
    pub ejection_time: f64,
    /// Du Bois body surface area in m².
    pub body_surface_area: f64,
    pub stroke_volume: f64,
    pub pulse_pressure: f64,
    pub mean_pressure: f64,
    pub systolic: f64,
    pub diastolic: f64,
}

/// Pulse-wave-analysis style model mapping heart rate and body measurements
/// to systolic and diastolic pressure.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureModel {
    config: PressureModelConfig,
}

impl PressureModel {
    pub fn new(config: PressureModelConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, heart_rate: f64, profile: &AnthropometricProfile) -> PressureEstimate {
        let c = &self.config;
        let (age, height, weight) = (profile.age, profile.height_cm, profile.weight_kg);

        let ejection_time = c.et_intercept - c.et_slope * heart_rate;
        let body_surface_area = 0.007184 * weight.powf(0.425) * height.powf(0.725);

        let mut stroke_volume = c.sv_intercept + c.sv_et_coeff * (ejection_time - c.sv_et_offset)
            - c.sv_hr_coeff * heart_rate
            + c.sv_bsa_coeff * body_surface_area
            - c.sv_age_coeff * age;
        if !stroke_volume.is_finite() || stroke_volume <= 0.0 {
            stroke_volume = c.min_stroke_volume;
        }

        let denom = c.pp_weight_coeff * weight - c.pp_age_coeff * age - c.pp_hr_coeff * heart_rate + c.pp_offset;
        let mut pulse_pressure = stroke_volume / denom;
        if !pulse_pressure.is_finite() || pulse_pressure <= 0.0 {
            pulse_pressure = c.default_pulse_pressure;
        }

        let q = if profile.gender.is_male() { c.q_male } else { c.q_female };
        let mean_pressure = q * c.peripheral_resistance;

        PressureEstimate {
            ejection_time,
            body_surface_area,
            stroke_volume,
            pulse_pressure,
            mean_pressure,
            systolic: ((mean_pressure + 1.5 * pulse_pressure) * c.multiplier).round(),
            diastolic: ((mean_pressure - pulse_pressure / 3.0) * c.multiplier).round(),
        }
    }
}

/// Blood pressure derived from the measured heart rate and the user's
/// anthropometrics.
#[derive(Debug, Clone)]
pub struct BloodPressureEstimator {
    config: BloodPressureConfig,
    model: PressureModel,
    profile: AnthropometricProfile,
    hr_history: VecDeque<f64>,
}

impl BloodPressureEstimator {
    pub fn new(config: BloodPressureConfig, profile: AnthropometricProfile) -> Self {
        let model = PressureModel::new(config.model.clone());
        Self {
            config,
            model,
            profile: profile.sanitized(),
            hr_history: VecDeque::new(),
        }
    }

    /// `0.6 * snr score + 0.4 * heart-rate stability`, both in `[0, 1]`.
    pub fn confidence(&self, snr: f64) -> f64 {
        let snr_score = (snr / (2.0 * self.config.snr_threshold)).min(1.0);
        let (lo, hi) = self
            .hr_history
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let stability = if self.hr_history.is_empty() {
            0.0
        } else {
            (1.0 - (hi - lo).max(1.0) / 10.0).max(0.0)
        };
        0.6 * snr_score + 0.4 * stability
    }

    fn in_range(value: f64, (min, max): (f64, f64)) -> Result<(), Rejection> {
        if value >= min && value <= max {
            Ok(())
        } else {
            Err(Rejection::OutOfRange { value, min, max })
        }
    }
}

impl VitalEstimator for BloodPressureEstimator {
    fn kind(&self) -> VitalKind {
        VitalKind::BloodPressure
    }

    fn timing(&self) -> Timing {
        self.config.timing
    }

    fn band(&self) -> Band {
        self.config.band
    }

    /// Only a frame dark in both green and red counts as lost contact.
    fn accepts(&self, sample: &ChannelSample) -> bool {
        let min = self.config.min_channel_level;
        !(sample.green < min && sample.red < min)
    }

    fn window_len(&self, sampling_freq: f64, _elapsed: Duration) -> usize {
        frames_for(self.config.timing.max_seconds, sampling_freq, self.config.timing.min_frames)
    }

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict {
        let gate = PulseGate {
            band: self.config.band,
            snr_threshold: self.config.snr_threshold,
            min_bpm: self.config.min_hr,
            max_bpm: self.config.max_hr,
        };
        let (bpm, snr) = match gate.measure(ctx.buffer, ctx.sampling_freq) {
            Ok(reading) => reading,
            Err(rejection) => {
                debug!("[BP] pulse rejected: {rejection}");
                return Verdict::Reject(rejection);
            }
        };

        if self.hr_history.len() >= self.config.history_len.max(1) {
            self.hr_history.pop_front();
        }
        self.hr_history.push_back(bpm.round());
        let heart_rate = history_median(&self.hr_history).unwrap_or(bpm.round());

        let estimate = self.model.estimate(heart_rate, &self.profile);
        debug!(
            "[BP] hr {heart_rate:.0} -> {:.0}/{:.0} (sv {:.1}, pp {:.1})",
            estimate.systolic, estimate.diastolic, estimate.stroke_volume, estimate.pulse_pressure
        );
        if let Err(rejection) = Self::in_range(estimate.systolic, self.config.systolic_range)
            .and_then(|_| Self::in_range(estimate.diastolic, self.config.diastolic_range))
        {
            return Verdict::Reject(rejection);
        }

        let confidence = self.confidence(snr);
        if confidence < self.config.min_confidence && !ctx.deadline_reached {
            return Verdict::Reject(Rejection::LowConfidence { confidence });
        }

        Verdict::Final(Measurement {
            value: VitalValue::BloodPressure {
                systolic: estimate.systolic,
                diastolic: estimate.diastolic,
                heart_rate,
            },
            quality: Quality { snr, confidence },
        })
    }

    fn reset(&mut self) {
        self.hr_history.clear();
    }
}
