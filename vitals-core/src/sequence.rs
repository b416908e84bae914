//! # Vital Signs Sequence
//!
//! The full check-up flow: heart rate, respiration, SpO₂ and blood pressure
//! measured one after the other. Each completed result is checked against
//! reporting bounds; an implausible one repeats the same step, an accepted
//! one is recorded in the profile store and advances the sequence.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::VitalsError;
use crate::estimators::Rejection;
use crate::profile::ProfileStore;
use crate::vital::{VitalKind, VitalResult, VitalValue};

/// Values outside these ranges are not reported and the step is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingBounds {
    pub heart_rate: (f64, f64),
    pub respiration: (f64, f64),
    pub spo2: (f64, f64),
    pub systolic: (f64, f64),
    pub diastolic: (f64, f64),
}

impl Default for ReportingBounds {
    fn default() -> Self {
        Self {
            heart_rate: (45.0, 200.0),
            respiration: (10.0, 30.0),
            spo2: (70.0, 100.0),
            systolic: (80.0, 200.0),
            diastolic: (50.0, 120.0),
        }
    }
}

fn within(value: f64, (min, max): (f64, f64)) -> Result<(), Rejection> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(Rejection::OutOfRange { value, min, max })
    }
}

impl ReportingBounds {
    pub fn check(&self, value: &VitalValue) -> Result<(), Rejection> {
        match *value {
            VitalValue::HeartRate { bpm } => within(bpm, self.heart_rate),
            VitalValue::Respiration { breaths_per_minute } => within(breaths_per_minute, self.respiration),
            VitalValue::Spo2 { percent, .. } => within(percent, self.spo2),
            VitalValue::BloodPressure {
                systolic, diastolic, ..
            } => within(systolic, self.systolic).and_then(|_| within(diastolic, self.diastolic)),
            VitalValue::Glucose { .. } => Ok(()),
        }
    }
}

/// Summary handed to the presentation collaborator after the last step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSignsReport {
    pub user: String,
    pub heart_rate: Option<f64>,
    pub respiration: Option<f64>,
    pub spo2: Option<f64>,
    pub systolic: Option<f64>,
    pub diastolic: Option<f64>,
    pub results: Vec<VitalResult>,
}

/// What the caller should do after submitting a result.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Start a session for this vital next.
    Next(VitalKind),
    /// The result was implausible; measure the same vital again.
    Repeat { kind: VitalKind, rejection: Rejection },
    Finished(VitalSignsReport),
}

#[derive(Debug, Clone)]
pub struct VitalSignsSequence {
    user: String,
    bounds: ReportingBounds,
    step: usize,
    results: Vec<VitalResult>,
}

impl VitalSignsSequence {
    pub const STEPS: [VitalKind; 4] = [
        VitalKind::HeartRate,
        VitalKind::Respiration,
        VitalKind::Spo2,
        VitalKind::BloodPressure,
    ];

    pub fn new(user: impl Into<String>) -> Self {
        Self::with_bounds(user, ReportingBounds::default())
    }

    pub fn with_bounds(user: impl Into<String>, bounds: ReportingBounds) -> Self {
        Self {
            user: user.into(),
            bounds,
            step: 0,
            results: Vec::new(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// The vital to measure now, or `None` once finished.
    pub fn current(&self) -> Option<VitalKind> {
        Self::STEPS.get(self.step).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.current().is_none()
    }

    /// Validates a completed result for the current step and advances.
    pub fn submit(
        &mut self,
        result: VitalResult,
        store: &mut dyn ProfileStore,
    ) -> Result<StepOutcome, VitalsError> {
        let expected = self.current();
        if expected != Some(result.kind) {
            return Err(VitalsError::OutOfSequence {
                expected,
                actual: result.kind,
            });
        }

        if let Err(rejection) = self.bounds.check(&result.value) {
            info!("[SEQUENCE] {} result not reportable ({rejection}), repeating", result.kind.tag());
            return Ok(StepOutcome::Repeat {
                kind: result.kind,
                rejection,
            });
        }

        store.record(&self.user, &result);
        self.results.push(result);
        self.step += 1;
        info!("[SEQUENCE] {} accepted, step {}/{}", result.kind.tag(), self.step, Self::STEPS.len());

        Ok(match self.current() {
            Some(next) => StepOutcome::Next(next),
            None => StepOutcome::Finished(self.report()),
        })
    }

    /// Report over the results accepted so far.
    pub fn report(&self) -> VitalSignsReport {
        let mut report = VitalSignsReport {
            user: self.user.clone(),
            heart_rate: None,
            respiration: None,
            spo2: None,
            systolic: None,
            diastolic: None,
            results: self.results.clone(),
        };
        for result in &self.results {
            match result.value {
                VitalValue::HeartRate { bpm } => report.heart_rate = Some(bpm),
                VitalValue::Respiration { breaths_per_minute } => report.respiration = Some(breaths_per_minute),
                VitalValue::Spo2 { percent, .. } => report.spo2 = Some(percent),
                VitalValue::BloodPressure {
                    systolic, diastolic, ..
                } => {
                    report.systolic = Some(systolic);
                    report.diastolic = Some(diastolic);
                }
                VitalValue::Glucose { .. } => {}
            }
        }
        report
    }
}
