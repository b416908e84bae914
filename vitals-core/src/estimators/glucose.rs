//! Heuristic glucose index. Not a diagnostic measurement: it combines the
//! red-channel level with pulse rate through fixed monotonic curves.

use std::collections::VecDeque;
use std::time::Duration;

use linreg::linear_regression;
use log::debug;
use serde::{Deserialize, Serialize};

use super::heart_rate::PulseGate;
use super::{AnalysisContext, Rejection, Verdict, VitalEstimator, frames_for};
use crate::channel::{Channel, ChannelSample};
use crate::config::{Band, GlucoseConfig, IrMapping, Timing};
use crate::error::VitalsError;
use crate::fft::find_dominant_frequency;
use crate::preprocess::mean;
use crate::vital::{Measurement, Quality, VitalKind, VitalValue};

const SPO2_RANGE: (f64, f64) = (90.0, 100.0);
const INFRARED_RANGE: (f64, f64) = (0.0, 200.0);

/// Stateful glucose curves: input smoothing histories plus the last stable
/// output used for temporal blending.
#[derive(Debug, Clone)]
pub struct GlucoseModel {
    config: GlucoseConfig,
    red_history: VecDeque<f64>,
    bpm_history: VecDeque<i64>,
    last_stable: f64,
}

impl GlucoseModel {
    pub fn new(config: GlucoseConfig) -> Self {
        let last_stable = config.initial_stable_value;
        Self {
            config,
            red_history: VecDeque::new(),
            bpm_history: VecDeque::new(),
            last_stable,
        }
    }

    pub fn reset(&mut self) {
        self.red_history.clear();
        self.bpm_history.clear();
        self.last_stable = self.config.initial_stable_value;
    }

    pub fn last_stable(&self) -> f64 {
        self.last_stable
    }

    /// Logistic curve of the clamped, normalized red level.
    pub fn from_red(&self, red: f64) -> f64 {
        let (lo, hi) = self.config.red_range;
        let normalized = (red.clamp(lo, hi) - lo) / (hi - lo);
        70.0 + 100.0 / (1.0 + (-6.0 * (normalized - 0.5)).exp())
    }

    /// Power-law curve of the clamped pulse rate. Rates under 60 bpm map to
    /// the curve's floor.
    pub fn from_bpm(&self, bpm: f64) -> f64 {
        let (lo, hi) = self.config.bpm_range;
        let x = ((bpm.clamp(lo, hi) - 60.0) / 120.0).max(0.0);
        80.0 + x.powf(1.2) * 70.0
    }

    fn clamp_output(&self, value: f64) -> f64 {
        value.clamp(self.config.output_range.0, self.config.output_range.1)
    }

    /// Primary path: red level and pulse rate, adaptively weighted, scaled by
    /// the meal factor and blended with the previous stable value.
    pub fn combined(&mut self, red: f64, bpm: f64) -> f64 {
        let window = self.config.smoothing_window.max(1);

        if self.red_history.len() >= window {
            self.red_history.pop_front();
        }
        self.red_history.push_back(red);
        let smoothed_red = self.red_history.iter().sum::<f64>() / self.red_history.len() as f64;

        if self.bpm_history.len() >= window {
            self.bpm_history.pop_front();
        }
        self.bpm_history.push_back(bpm.round() as i64);
        // Integer average, truncating.
        let smoothed_bpm = self.bpm_history.iter().sum::<i64>() / self.bpm_history.len() as i64;

        let g_red = self.from_red(smoothed_red);
        let g_bpm = self.from_bpm(smoothed_bpm as f64);

        let w_red = if (g_red - self.last_stable).abs() < self.config.steady_delta {
            self.config.steady_red_weight
        } else {
            self.config.unsteady_red_weight
        };
        let raw = (w_red * g_red + (1.0 - w_red) * g_bpm) * self.config.meal.factor();
        let blended = self.config.history_blend * self.last_stable
            + (1.0 - self.config.history_blend) * self.clamp_output(raw);

        debug!("[GLUCOSE] red {smoothed_red:.1} bpm {smoothed_bpm} -> {blended:.1}");
        self.last_stable = blended;
        blended
    }

    /// Secondary path from an SpO₂ reading: lower saturation maps higher.
    pub fn from_spo2(&self, spo2: f64) -> f64 {
        let s = spo2.clamp(SPO2_RANGE.0, SPO2_RANGE.1);
        self.clamp_output((120.0 - (s - 90.0) * 2.0) * self.config.meal.factor())
    }

    /// Secondary path from a raw infrared level through the linear mapping.
    pub fn from_infrared(&self, infrared: f64) -> f64 {
        let IrMapping {
            slope,
            intercept,
            correction,
        } = self.config.infrared;
        let v = infrared.clamp(INFRARED_RANGE.0, INFRARED_RANGE.1);
        self.clamp_output((slope * v + intercept + correction) * self.config.meal.factor())
    }

    /// Display value: mean of both secondary paths when an infrared level is
    /// available, otherwise the SpO₂ path alone.
    pub fn display(&self, spo2: f64, infrared: Option<f64>) -> f64 {
        let from_spo2 = self.from_spo2(spo2);
        match infrared {
            Some(v) => (from_spo2 + self.from_infrared(v)) / 2.0,
            None => from_spo2,
        }
    }
}

/// Least-squares fit of reference glucose readings against infrared levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrCalibration {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl IrCalibration {
    pub fn fit(infrared: &[f64], glucose: &[f64]) -> Result<Self, VitalsError> {
        let n = infrared.len().min(glucose.len());
        if n < 2 {
            return Err(VitalsError::NotEnoughPoints { needed: 2, actual: n });
        }
        let (xs, ys) = (&infrared[..n], &glucose[..n]);
        let (slope, intercept): (f64, f64) = linear_regression::<f64, f64, f64>(xs, ys)
            .map_err(|e| VitalsError::DegenerateFit(format!("{e:?}")))?;
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(VitalsError::DegenerateFit("non-finite coefficients".into()));
        }

        let y_mean = mean(ys);
        let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();
        let ss_res: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
            .sum();
        let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

        Ok(Self {
            slope,
            intercept,
            r_squared,
        })
    }

    /// Infrared mapping using this fit, with no extra correction.
    pub fn mapping(&self) -> IrMapping {
        IrMapping {
            slope: self.slope,
            intercept: self.intercept,
            correction: 0.0,
        }
    }
}

/// Session estimator for the primary glucose path.
#[derive(Debug, Clone)]
pub struct GlucoseEstimator {
    config: GlucoseConfig,
    model: GlucoseModel,
}

impl GlucoseEstimator {
    pub fn new(config: GlucoseConfig) -> Self {
        Self {
            model: GlucoseModel::new(config.clone()),
            config,
        }
    }

    pub fn model(&self) -> &GlucoseModel {
        &self.model
    }
}

impl VitalEstimator for GlucoseEstimator {
    fn kind(&self) -> VitalKind {
        VitalKind::Glucose
    }

    fn timing(&self) -> Timing {
        self.config.timing
    }

    fn band(&self) -> Band {
        self.config.band
    }

    fn accepts(&self, sample: &ChannelSample) -> bool {
        sample.red >= self.config.min_channel_level
    }

    fn window_len(&self, sampling_freq: f64, _elapsed: Duration) -> usize {
        frames_for(self.config.timing.max_seconds, sampling_freq, self.config.timing.min_frames)
    }

    fn analyze(&mut self, ctx: &AnalysisContext<'_>) -> Verdict {
        let red = ctx.buffer.channel_values(Channel::Red);
        let gate = PulseGate {
            band: self.config.band,
            snr_threshold: self.config.snr_threshold,
            min_bpm: self.config.min_bpm,
            max_bpm: self.config.max_bpm,
        };
        let (bpm, snr) = match gate.validate(find_dominant_frequency(&red, ctx.sampling_freq, self.config.band)) {
            Ok(reading) => reading,
            Err(rejection) => {
                debug!("[GLUCOSE] pulse rejected: {rejection}");
                return Verdict::Reject(rejection);
            }
        };
        let level = mean(&red);
        if !level.is_finite() {
            return Verdict::Reject(Rejection::NonFinite);
        }

        let mg_dl = self.model.combined(level, bpm);
        Verdict::Final(Measurement {
            value: VitalValue::Glucose {
                mg_dl,
                pulse_bpm: bpm.round(),
            },
            quality: Quality::from_snr(snr, self.config.snr_threshold),
        })
    }

    fn reset(&mut self) {
        self.model.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::estimators::test_support::buffer_from;
    use crate::profile::MealTiming;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::RefCell;
    use std::f64::consts::PI;

    fn model(meal: MealTiming) -> GlucoseModel {
        GlucoseModel::new(GlucoseConfig {
            meal,
            ..GlucoseConfig::default()
        })
    }

    #[test]
    fn curve_midpoints() {
        let m = model(MealTiming::Fasting);
        assert_relative_eq!(m.from_red(125.0), 120.0);
        assert_relative_eq!(m.from_red(10.0), m.from_red(50.0));
        assert_relative_eq!(m.from_bpm(60.0), 80.0);
        assert_relative_eq!(m.from_bpm(180.0), 150.0);
        // Below 60 bpm the base is clamped to zero instead of going NaN.
        assert_relative_eq!(m.from_bpm(52.0), 80.0);
    }

    #[test]
    fn combined_fasting_and_breakfast() {
        let mut fasting = model(MealTiming::Fasting);
        assert_relative_eq!(fasting.combined(125.0, 60.0), 100.0);

        let mut breakfast = model(MealTiming::Breakfast);
        // 0.5 * 120 + 0.5 * 80 = 100, * 1.1 = 110, blended 0.6 * 100 + 0.4 * 110
        assert_relative_eq!(breakfast.combined(125.0, 60.0), 104.0, epsilon = 1e-9);
        assert_relative_eq!(breakfast.last_stable(), 104.0, epsilon = 1e-9);

        breakfast.reset();
        assert_eq!(breakfast.last_stable(), 100.0);
    }

    #[test]
    fn steady_red_gets_more_weight() {
        let mut m = model(MealTiming::Fasting);
        let red = 104.0;
        let g_red = m.from_red(red);
        assert!((g_red - 100.0).abs() < 5.0, "g_red {g_red}");
        let expected = 0.6 * 100.0 + 0.4 * (0.7 * g_red + 0.3 * 80.0);
        assert_relative_eq!(m.combined(red, 60.0), expected, epsilon = 1e-9);
    }

    #[test]
    fn secondary_paths() {
        let m = model(MealTiming::Fasting);
        assert_relative_eq!(m.from_spo2(95.0), 110.0);
        assert_relative_eq!(m.from_spo2(80.0), 120.0);
        assert_relative_eq!(m.from_infrared(60.0), 100.0);
        assert_relative_eq!(m.from_infrared(500.0), 170.0);
        assert_relative_eq!(m.display(95.0, Some(60.0)), 105.0);
        assert_relative_eq!(m.display(95.0, None), 110.0);
    }

    #[test]
    fn infrared_calibration_fit() {
        let ir = [40.0, 80.0, 120.0, 160.0];
        let glucose: Vec<f64> = ir.iter().map(|v| 0.4 * v + 75.0).collect();
        let fit = IrCalibration::fit(&ir, &glucose).unwrap();
        assert_relative_eq!(fit.slope, 0.4, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 75.0, epsilon = 1e-9);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-9);

        assert!(matches!(
            IrCalibration::fit(&[1.0], &[90.0]),
            Err(VitalsError::NotEnoughPoints { actual: 1, .. })
        ));
        assert!(IrCalibration::fit(&[5.0, 5.0, 5.0], &[80.0, 90.0, 100.0]).is_err());
    }

    fn ctx(buffer: &SampleBuffer, fs: f64) -> AnalysisContext<'_> {
        AnalysisContext {
            buffer,
            sampling_freq: fs,
            elapsed: buffer.span(),
            deadline_reached: false,
        }
    }

    #[test]
    fn noise_only_window_is_rejected() {
        let rng = RefCell::new(StdRng::seed_from_u64(11));
        let buffer = buffer_from(
            30.0,
            600,
            |_| 150.0 + rng.borrow_mut().gen_range(-3.0..3.0),
            |_| 120.0,
            |_| 90.0,
        );
        let mut estimator = GlucoseEstimator::new(GlucoseConfig::default());

        let verdict = estimator.analyze(&ctx(&buffer, 30.0));
        assert!(
            matches!(verdict, Verdict::Reject(Rejection::LowSnr { .. })),
            "noise produced {verdict:?}"
        );
        assert_eq!(estimator.model().last_stable(), 100.0);
    }

    #[test]
    fn clear_pulse_finalizes() {
        let buffer = buffer_from(
            30.0,
            600,
            |t| 150.0 + 3.0 * (2.0 * PI * 1.2 * t).sin(),
            |_| 120.0,
            |_| 90.0,
        );
        let mut estimator = GlucoseEstimator::new(GlucoseConfig::default());

        match estimator.analyze(&ctx(&buffer, 30.0)) {
            Verdict::Final(Measurement {
                value: VitalValue::Glucose { mg_dl, pulse_bpm },
                quality,
            }) => {
                assert!((70.0..=74.0).contains(&pulse_bpm), "pulse {pulse_bpm}");
                assert!((70.0..=180.0).contains(&mg_dl));
                assert!(quality.snr >= 4.0);
            }
            other => panic!("expected a final reading, got {other:?}"),
        }
    }
}
