use std::time::Duration;

use log::debug;

use super::{AnalysisContext, Rejection, Verdict, VitalEstimator, frames_for};
use crate::autocorr::find_period;
use crate::channel::{Channel, ChannelSample};
use crate::config::{Band, RespirationConfig, Timing};
use crate::fft::find_dominant_frequency;
use crate::preprocess::{median_abs_deviation, remove_linear_trend, remove_mean, rms};
use crate::vital::{Measurement, Quality, VitalKind, VitalValue};

const MIN_RMS: f64 = 1e-9;

/// Breathing rate from the slow baseline modulation of the green channel.
///
/// The lag-domain estimate is preferred; the spectral estimate backs it up and,
/// when the two agree, both are averaged.
#[derive(Debug, Clone)]
pub struct RespirationEstimator {
    config: RespirationConfig,
}

/// Both breathing-rate estimates for one window, in breaths per minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimates {
    pub autocorrelation: Option<f64>,
    pub spectral: Option<f64>,
    /// Signal energy over `N * MAD` of the conditioned window.
    pub energy_ratio: f64,
}

/// Detrends, centres, smooths with a short three-tap filter, and scales the
/// window to unit RMS. Returns `None` when the window carries no signal.
pub fn condition(samples: &[f64]) -> Option<Vec<f64>> {
    let mut x = samples.to_vec();
    remove_linear_trend(&mut x);
    remove_mean(&mut x);

    let mut smooth: Vec<f64> = (0..x.len())
        .map(|i| {
            let mut s = x[i];
            if i > 0 {
                s = (s + x[i - 1]) * 0.5;
            }
            if i > 1 {
                s = (s + x[i - 2]) * 0.5;
            }
            s
        })
        .collect();

    let level = rms(&smooth);
    if !(level > MIN_RMS) {
        return None;
    }
    smooth.iter_mut().for_each(|v| *v /= level);
    Some(smooth)
}

impl RespirationEstimator {
    pub fn new(config: RespirationConfig) -> Self {
        Self { config }
    }

    fn in_range(&self, rpm: f64) -> bool {
        rpm.is_finite() && rpm >= self.config.min_rpm && rpm <= self.config.max_rpm
    }

    /// Runs both engines over a conditioned window.
    pub fn estimate(&self, conditioned: &[f64], sampling_freq: f64) -> RateEstimates {
        let band = self.config.band;
        let autocorrelation = find_period(conditioned, sampling_freq, band, self.config.autocorr_threshold)
            .map(|r| r.frequency_hz * 60.0);
        let spectral = find_dominant_frequency(conditioned, sampling_freq, band)
            .map(|r| r.dominant_frequency_hz * 60.0);

        let energy: f64 = conditioned.iter().map(|v| v * v).sum();
        let noise = median_abs_deviation(conditioned).max(1e-12);
        let energy_ratio = energy / (noise * conditioned.len().max(1) as f64);

        RateEstimates {
            autocorrelation,
            spectral,
            energy_ratio,
        }
    }

    /// Chooses the reported rate from both estimates.
    pub fn combine(&self, estimates: &RateEstimates) -> Option<f64> {
        let auto = estimates.autocorrelation.filter(|&r| self.in_range(r));
        let spectral = estimates.spectral.filter(|&r| self.in_range(r));

        if let (Some(a), Some(s)) = (auto, spectral) {
            let rel_diff = (a - s).abs() / ((a + s) / 2.0).max(1.0);
            if rel_diff < self.config.agreement_tolerance {
                return Some(((a + s) * 0.5).round());
            }
        }
        if let Some(a) = auto {
            if estimates.energy_ratio > self.config.energy_ratio_threshold {
                return Some(a.round());
            }
        }
        spectral.map(f64::round)
    }
}

impl VitalEstimator for RespirationEstimator {
    fn kind(&self) -> VitalKind {
        VitalKind::Respiration
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
        frames_for(self.config.timing.min_seconds, sampling_freq, self.config.timing.min_frames)
    }

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict {
        let needed = self.config.timing.min_frames;
        if ctx.buffer.len() < needed {
            return Verdict::Reject(Rejection::InsufficientData {
                samples: ctx.buffer.len(),
                needed,
            });
        }

        let green = ctx.buffer.channel_values(Channel::Green);
        let Some(conditioned) = condition(&green) else {
            debug!("[RR] signal too weak, restarting");
            return Verdict::Restart(Rejection::WeakSignal);
        };

        let estimates = self.estimate(&conditioned, ctx.sampling_freq);
        debug!(
            "[RR] autocorr {:?} rpm, spectral {:?} rpm, energy ratio {:.2}",
            estimates.autocorrelation, estimates.spectral, estimates.energy_ratio
        );

        match self.combine(&estimates) {
            Some(rpm) => Verdict::Final(Measurement {
                value: VitalValue::Respiration {
                    breaths_per_minute: rpm,
                },
                quality: Quality {
                    snr: estimates.energy_ratio,
                    confidence: (estimates.energy_ratio / (2.0 * self.config.energy_ratio_threshold))
                        .clamp(0.0, 1.0),
                },
            }),
            None => {
                let value = estimates
                    .autocorrelation
                    .or(estimates.spectral)
                    .unwrap_or(f64::NAN);
                let rejection = if value.is_finite() {
                    Rejection::OutOfRange {
                        value,
                        min: self.config.min_rpm,
                        max: self.config.max_rpm,
                    }
                } else {
                    Rejection::NoPeak
                };
                debug!("[RR] rejected: {rejection}, restarting");
                Verdict::Restart(rejection)
            }
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::test_support::buffer_from;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn estimator() -> RespirationEstimator {
        RespirationEstimator::new(RespirationConfig::default())
    }

    fn analyze(buffer: &crate::buffer::SampleBuffer, fs: f64) -> Verdict {
        estimator().analyze(&AnalysisContext {
            buffer,
            sampling_freq: fs,
            elapsed: buffer.span(),
            deadline_reached: false,
        })
    }

    #[test]
    fn measures_fifteen_breaths_per_minute() {
        let fs = 30.0;
        let buffer = buffer_from(
            fs,
            600,
            |_| 180.0,
            |t| 90.0 + 0.1 * t + 2.0 * (2.0 * PI * 0.25 * t).sin(),
            |_| 90.0,
        );
        match analyze(&buffer, fs) {
            Verdict::Final(m) => assert_abs_diff_eq!(m.value.primary(), 15.0, epsilon = 1.0),
            other => panic!("expected final verdict, got {other:?}"),
        }
    }

    #[test]
    fn flat_window_restarts_as_weak() {
        let fs = 30.0;
        let buffer = buffer_from(fs, 600, |_| 180.0, |_| 90.0, |_| 90.0);
        assert_eq!(analyze(&buffer, fs), Verdict::Restart(Rejection::WeakSignal));
    }

    #[test]
    fn conditioning_normalizes_to_unit_rms() {
        let raw: Vec<f64> = (0..300).map(|i| 50.0 + 5.0 * (i as f64 * 0.05).sin()).collect();
        let x = condition(&raw).unwrap();
        assert_abs_diff_eq!(rms(&x), 1.0, epsilon = 1e-9);
        assert!(condition(&[7.0; 40]).is_none());
    }

    #[test]
    fn agreement_averages_estimates() {
        let rr = estimator();
        let agree = RateEstimates {
            autocorrelation: Some(15.4),
            spectral: Some(16.2),
            energy_ratio: 0.1,
        };
        assert_eq!(rr.combine(&agree), Some(16.0));

        let trusted_auto = RateEstimates {
            autocorrelation: Some(12.0),
            spectral: Some(30.0),
            energy_ratio: 1.0,
        };
        assert_eq!(rr.combine(&trusted_auto), Some(12.0));

        let weak_auto = RateEstimates {
            energy_ratio: 0.2,
            ..trusted_auto
        };
        assert_eq!(rr.combine(&weak_auto), Some(30.0));

        let neither = RateEstimates {
            autocorrelation: Some(3.0),
            spectral: Some(45.0),
            energy_ratio: 2.0,
        };
        assert_eq!(rr.combine(&neither), None);
    }
}
