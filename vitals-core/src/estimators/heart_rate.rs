use std::collections::VecDeque;
use std::time::Duration;

use log::debug;

use super::{AnalysisContext, Rejection, Verdict, VitalEstimator, frames_for, history_median};
use crate::buffer::SampleBuffer;
use crate::channel::{Channel, ChannelSample};
use crate::config::{Band, HeartRateConfig, Timing};
use crate::fft::{SpectralResult, find_dominant_frequency};
use crate::vital::{Measurement, Quality, VitalKind, VitalValue};

/// Pulse search limits shared by the heart-rate and blood-pressure estimators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PulseGate {
    pub band: Band,
    pub snr_threshold: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
}

impl PulseGate {
    /// Checks a spectral result against the SNR threshold and bpm bounds,
    /// returning `(bpm, snr)`.
    pub fn validate(&self, result: Option<SpectralResult>) -> Result<(f64, f64), Rejection> {
        let result = result.ok_or(Rejection::NoPeak)?;
        let bpm = result.dominant_frequency_hz * 60.0;
        if !bpm.is_finite() || !result.snr.is_finite() {
            return Err(Rejection::NonFinite);
        }
        if result.snr < self.snr_threshold {
            return Err(Rejection::LowSnr {
                snr: result.snr,
                threshold: self.snr_threshold,
            });
        }
        if bpm < self.min_bpm || bpm > self.max_bpm {
            return Err(Rejection::OutOfRange {
                value: bpm,
                min: self.min_bpm,
                max: self.max_bpm,
            });
        }
        Ok((bpm, result.snr))
    }

    /// Pulse from the green channel, retried on red when green fails.
    pub fn measure(&self, buffer: &SampleBuffer, sampling_freq: f64) -> Result<(f64, f64), Rejection> {
        let green = buffer.channel_values(Channel::Green);
        let reading = self.validate(find_dominant_frequency(&green, sampling_freq, self.band));
        if reading.is_ok() {
            return reading;
        }
        let red = buffer.channel_values(Channel::Red);
        match find_dominant_frequency(&red, sampling_freq, self.band) {
            Some(result) => {
                debug!("[PULSE] green unusable ({reading:?}), retrying on red");
                self.validate(Some(result))
            }
            None => reading,
        }
    }
}

/// Pulse rate from the dominant cardiac frequency of the green channel,
/// falling back to red when green is unusable.
#[derive(Debug, Clone)]
pub struct HeartRateEstimator {
    config: HeartRateConfig,
    ema: Option<f64>,
    /// Rounded EMA outputs, newest last.
    history: VecDeque<f64>,
}

impl HeartRateEstimator {
    pub fn new(config: HeartRateConfig) -> Self {
        let capacity = config.history_len.max(1);
        Self {
            config,
            ema: None,
            history: VecDeque::with_capacity(capacity),
        }
    }

    fn gate(&self) -> PulseGate {
        PulseGate {
            band: self.config.band,
            snr_threshold: self.config.snr_threshold,
            min_bpm: self.config.min_bpm,
            max_bpm: self.config.max_bpm,
        }
    }

    /// Folds an accepted reading into the EMA and returns the history median.
    fn smooth(&mut self, bpm: f64) -> f64 {
        let alpha = self.config.ema_alpha;
        let ema = match self.ema {
            Some(prev) => alpha * bpm + (1.0 - alpha) * prev,
            None => bpm,
        };
        self.ema = Some(ema);

        if self.history.len() >= self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(ema.round());
        history_median(&self.history).unwrap_or(ema)
    }

    /// True when the newest `stable_count` readings lie within `stable_delta`.
    pub fn is_stable(&self) -> bool {
        let n = self.config.stable_count;
        if n == 0 || self.history.len() < n {
            return false;
        }
        let recent = self.history.iter().skip(self.history.len() - n);
        let (lo, hi) = recent.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        hi - lo <= self.config.stable_delta
    }
}

impl VitalEstimator for HeartRateEstimator {
    fn kind(&self) -> VitalKind {
        VitalKind::HeartRate
    }

    fn timing(&self) -> Timing {
        self.config.timing
    }

    fn band(&self) -> Band {
        self.config.band
    }

    fn accepts(&self, sample: &ChannelSample) -> bool {
        sample.green >= self.config.min_channel_level && sample.red >= self.config.min_channel_level
    }

    fn window_len(&self, sampling_freq: f64, _elapsed: Duration) -> usize {
        frames_for(self.config.timing.max_seconds, sampling_freq, self.config.timing.min_frames)
    }

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict {
        let (bpm, snr) = match self.gate().measure(ctx.buffer, ctx.sampling_freq) {
            Ok(reading) => reading,
            Err(rejection) => {
                debug!("[HR] rejected: {rejection}");
                return Verdict::Reject(rejection);
            }
        };

        let smoothed = self.smooth(bpm);
        debug!("[HR] raw {bpm:.1} bpm, smoothed {smoothed:.0}, snr {snr:.2}");

        if self.is_stable() || ctx.deadline_reached {
            Verdict::Final(Measurement {
                value: VitalValue::HeartRate { bpm: smoothed },
                quality: Quality::from_snr(snr, self.config.snr_threshold),
            })
        } else {
            Verdict::Candidate {
                value: smoothed,
                snr,
            }
        }
    }

    fn reset(&mut self) {
        self.ema = None;
        self.history.clear();
    }
}
