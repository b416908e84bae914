use std::collections::VecDeque;
use std::time::Duration;

use log::debug;

use super::{AnalysisContext, Rejection, Verdict, VitalEstimator, frames_for};
use crate::channel::{Channel, ChannelSample};
use crate::config::{Band, Spo2Config, Timing};
use crate::fft::{coarse_dominant_frequency, find_dominant_frequency};
use crate::preprocess::{mean, std_dev};
use crate::vital::{Measurement, Quality, VitalKind, VitalValue};

/// Pulsatile (AC) and steady (DC) components of one channel window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perfusion {
    pub ac: f64,
    pub dc: f64,
}

impl Perfusion {
    pub fn of(samples: &[f64]) -> Self {
        Self {
            ac: std_dev(samples),
            dc: mean(samples),
        }
    }

    /// Stability ratio `AC / DC`; zero when there is no DC level.
    pub fn ratio(&self) -> f64 {
        if self.dc > 0.0 { self.ac / self.dc } else { 0.0 }
    }
}

/// Ratio-of-ratios `R = (AC_red / DC_red) / (AC_blue / DC_blue)`.
pub fn ratio_of_ratios(red: Perfusion, blue: Perfusion) -> f64 {
    red.ratio() / blue.ratio()
}

/// Oxygen saturation from the red/blue ratio-of-ratios, with pulse rate from
/// the red spectrum.
#[derive(Debug, Clone)]
pub struct Spo2Estimator {
    config: Spo2Config,
    spo2_history: VecDeque<f64>,
    pulse_history: VecDeque<f64>,
}

impl Spo2Estimator {
    pub fn new(config: Spo2Config) -> Self {
        Self {
            config,
            spo2_history: VecDeque::new(),
            pulse_history: VecDeque::new(),
        }
    }

    /// Linear calibration `A - B * R`, clamped to the reportable range.
    pub fn calibrate(&self, ratio: f64) -> f64 {
        (self.config.calibration_a - self.config.calibration_b * ratio)
            .clamp(self.config.min_percent, self.config.max_percent)
    }

    fn pulse_ok(&self, bpm: f64) -> bool {
        bpm.is_finite() && bpm >= self.config.min_pulse_bpm && bpm <= self.config.max_pulse_bpm
    }

    /// Evaluates the window; on success returns `(spo2, pulse, combined_snr)`.
    fn evaluate(&self, ctx: &AnalysisContext<'_>) -> Result<(f64, f64, f64), Verdict> {
        let cfg = &self.config;
        let red = ctx.buffer.channel_values(Channel::Red);
        let blue = ctx.buffer.channel_values(Channel::Blue);

        let (red_p, blue_p) = (Perfusion::of(&red), Perfusion::of(&blue));
        if !(red_p.dc > 0.0) || !(blue_p.dc > 0.0) {
            return Err(Verdict::Reject(Rejection::WeakSignal));
        }
        let (stab_r, stab_b) = (red_p.ratio(), blue_p.ratio());
        if stab_r > cfg.noisy_ratio || stab_b > cfg.noisy_ratio {
            return Err(Verdict::Restart(Rejection::TooNoisy {
                ratio: stab_r.max(stab_b),
            }));
        }
        if stab_r < cfg.flat_ratio || stab_b < cfg.flat_ratio {
            return Err(Verdict::Reject(Rejection::TooFlat {
                ratio: stab_r.min(stab_b),
            }));
        }

        let fs = ctx.sampling_freq;
        let red_peak = find_dominant_frequency(&red, fs, cfg.band);
        let blue_peak = find_dominant_frequency(&blue, fs, cfg.band);
        let snr_r = red_peak.map_or(0.0, |p| p.snr);
        let snr_b = blue_peak.map_or(0.0, |p| p.snr);
        if snr_r < cfg.snr_threshold && snr_b < cfg.snr_threshold {
            return Err(Verdict::Reject(Rejection::LowSnr {
                snr: snr_r.max(snr_b),
                threshold: cfg.snr_threshold,
            }));
        }

        let mut pulse = red_peak.map_or(f64::NAN, |p| (p.dominant_frequency_hz * 60.0).round());
        if !self.pulse_ok(pulse) {
            if let Some(hz) = coarse_dominant_frequency(&red, fs) {
                debug!("[SPO2] pulse {pulse} implausible, coarse estimate {:.0}", hz * 60.0);
                pulse = (hz * 60.0).round();
            }
        }

        let spo2 = self.calibrate(ratio_of_ratios(red_p, blue_p));
        if !spo2.is_finite() {
            return Err(Verdict::Reject(Rejection::NonFinite));
        }

        let combined = snr_r.min(snr_b);
        let lenient = cfg.snr_threshold / cfg.snr_leniency;
        if combined < lenient {
            return Err(Verdict::Reject(Rejection::LowSnr {
                snr: combined,
                threshold: lenient,
            }));
        }
        if !self.pulse_ok(pulse) {
            return Err(Verdict::Reject(Rejection::OutOfRange {
                value: pulse,
                min: cfg.min_pulse_bpm,
                max: cfg.max_pulse_bpm,
            }));
        }

        Ok((spo2, pulse, combined))
    }

    fn push(&mut self, spo2: f64, pulse: f64) {
        let window = self.config.smoothing_window.max(1);
        for (history, v) in [(&mut self.spo2_history, spo2), (&mut self.pulse_history, pulse)] {
            if history.len() >= window {
                history.pop_front();
            }
            history.push_back(v);
        }
    }

    /// Averages of the accepted history, if any.
    fn smoothed(&self) -> Option<(f64, f64)> {
        if self.spo2_history.is_empty() {
            return None;
        }
        let n = self.spo2_history.len() as f64;
        Some((
            self.spo2_history.iter().sum::<f64>() / n,
            (self.pulse_history.iter().sum::<f64>() / n).round(),
        ))
    }

    fn finalize(&self, snr: f64) -> Option<Verdict> {
        let (spo2, pulse) = self.smoothed()?;
        Some(Verdict::Final(Measurement {
            value: VitalValue::Spo2 {
                percent: spo2.round(),
                pulse_bpm: pulse,
            },
            quality: Quality::from_snr(snr, self.config.snr_threshold),
        }))
    }
}

impl VitalEstimator for Spo2Estimator {
    fn kind(&self) -> VitalKind {
        VitalKind::Spo2
    }

    fn timing(&self) -> Timing {
        self.config.timing
    }

    fn band(&self) -> Band {
        self.config.band
    }

    fn accepts(&self, sample: &ChannelSample) -> bool {
        sample.red >= self.config.min_channel_level && sample.blue >= self.config.min_channel_level
    }

    fn window_len(&self, sampling_freq: f64, elapsed: Duration) -> usize {
        let secs = elapsed.as_secs_f64().min(self.config.timing.max_seconds);
        frames_for(secs, sampling_freq, self.config.timing.min_frames)
    }

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict {
        match self.evaluate(ctx) {
            Ok((spo2, pulse, snr)) => {
                self.push(spo2, pulse);
                debug!("[SPO2] accepted {spo2:.1}% pulse {pulse:.0} snr {snr:.2}");
                let enough = self.spo2_history.len() >= self.config.smoothing_window.max(1);
                if enough || ctx.deadline_reached {
                    if let Some(verdict) = self.finalize(snr) {
                        return verdict;
                    }
                }
                Verdict::Candidate { value: spo2, snr }
            }
            Err(verdict) => {
                debug!("[SPO2] {verdict:?}");
                if ctx.deadline_reached {
                    // Fall back to what was accepted earlier in this attempt.
                    if let Some(final_verdict) = self.finalize(0.0) {
                        return final_verdict;
                    }
                }
                verdict
            }
        }
    }

    fn reset(&mut self) {
        self.spo2_history.clear();
        self.pulse_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::estimators::test_support::buffer_from;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn ctx(buffer: &SampleBuffer, fs: f64, deadline: bool) -> AnalysisContext<'_> {
        AnalysisContext {
            buffer,
            sampling_freq: fs,
            elapsed: buffer.span(),
            deadline_reached: deadline,
        }
    }

    fn pulsatile(red_depth: f64, blue_depth: f64) -> SampleBuffer {
        let wave = |t: f64| (2.0 * PI * 1.2 * t).sin();
        buffer_from(
            30.0,
            360,
            move |t| 150.0 * (1.0 + red_depth * wave(t)),
            |_| 80.0,
            move |t| 80.0 * (1.0 + blue_depth * wave(t)),
        )
    }

    #[test]
    fn unit_ratio_maps_to_a_minus_b() {
        let buffer = pulsatile(0.02, 0.02);
        let red = Perfusion::of(&buffer.channel_values(Channel::Red));
        let blue = Perfusion::of(&buffer.channel_values(Channel::Blue));
        assert_abs_diff_eq!(ratio_of_ratios(red, blue), 1.0, epsilon = 1e-9);

        let mut est = Spo2Estimator::new(Spo2Config::default());
        let verdicts: Vec<_> = (0..3).map(|_| est.analyze(&ctx(&buffer, 30.0, false))).collect();
        assert!(matches!(verdicts[0], Verdict::Candidate { .. }));
        match verdicts[2] {
            Verdict::Final(m) => match m.value {
                VitalValue::Spo2 { percent, pulse_bpm } => {
                    assert_eq!(percent, 85.0);
                    assert_abs_diff_eq!(pulse_bpm, 72.0, epsilon = 2.0);
                }
                other => panic!("unexpected value {other:?}"),
            },
            other => panic!("expected final verdict, got {other:?}"),
        }
    }

    #[test]
    fn calibration_clamps() {
        let est = Spo2Estimator::new(Spo2Config::default());
        assert_eq!(est.calibrate(0.2), 100.0);
        assert_eq!(est.calibrate(0.6), 95.0);
        assert_eq!(est.calibrate(3.0), 60.0);
    }

    #[test]
    fn flat_and_noisy_windows() {
        let mut est = Spo2Estimator::new(Spo2Config::default());
        let flat = pulsatile(0.0005, 0.02);
        assert!(matches!(
            est.analyze(&ctx(&flat, 30.0, false)),
            Verdict::Reject(Rejection::TooFlat { .. })
        ));
        let noisy = pulsatile(0.5, 0.02);
        assert!(matches!(
            est.analyze(&ctx(&noisy, 30.0, false)),
            Verdict::Restart(Rejection::TooNoisy { .. })
        ));
        assert!(est.smoothed().is_none());
    }

    #[test]
    fn deadline_finalizes_from_history() {
        let mut est = Spo2Estimator::new(Spo2Config::default());
        let good = pulsatile(0.02, 0.01);
        assert!(matches!(
            est.analyze(&ctx(&good, 30.0, false)),
            Verdict::Candidate { .. }
        ));
        let flat = pulsatile(0.0005, 0.02);
        match est.analyze(&ctx(&flat, 30.0, true)) {
            // R = 2 -> 110 - 50
            Verdict::Final(m) => assert_eq!(m.value.primary(), 60.0),
            other => panic!("expected final verdict, got {other:?}"),
        }
    }
}
