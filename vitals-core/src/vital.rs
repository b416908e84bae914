use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VitalsError;

/// The vital signs the engine can measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalKind {
    HeartRate,
    Respiration,
    Spo2,
    BloodPressure,
    Glucose,
}

impl VitalKind {
    pub const ALL: [VitalKind; 5] = [
        VitalKind::HeartRate,
        VitalKind::Respiration,
        VitalKind::Spo2,
        VitalKind::BloodPressure,
        VitalKind::Glucose,
    ];

    /// Short tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            VitalKind::HeartRate => "HR",
            VitalKind::Respiration => "RR",
            VitalKind::Spo2 => "SPO2",
            VitalKind::BloodPressure => "BP",
            VitalKind::Glucose => "GLUCOSE",
        }
    }
}

impl fmt::Display for VitalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VitalKind::HeartRate => "heart rate",
            VitalKind::Respiration => "respiration",
            VitalKind::Spo2 => "SpO2",
            VitalKind::BloodPressure => "blood pressure",
            VitalKind::Glucose => "glucose",
        };
        f.write_str(name)
    }
}

impl FromStr for VitalKind {
    type Err = VitalsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "hr" | "heart_rate" | "pulse" => Ok(VitalKind::HeartRate),
            "rr" | "respiration" | "breathing" => Ok(VitalKind::Respiration),
            "spo2" | "o2" | "oxygen" => Ok(VitalKind::Spo2),
            "bp" | "blood_pressure" => Ok(VitalKind::BloodPressure),
            "glucose" | "bg" => Ok(VitalKind::Glucose),
            _ => Err(VitalsError::UnknownVital(s.to_string())),
        }
    }
}

/// Measured value(s) of one vital sign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VitalValue {
    HeartRate { bpm: f64 },
    Respiration { breaths_per_minute: f64 },
    Spo2 { percent: f64, pulse_bpm: f64 },
    BloodPressure { systolic: f64, diastolic: f64, heart_rate: f64 },
    Glucose { mg_dl: f64, pulse_bpm: f64 },
}

impl VitalValue {
    pub fn kind(&self) -> VitalKind {
        match self {
            VitalValue::HeartRate { .. } => VitalKind::HeartRate,
            VitalValue::Respiration { .. } => VitalKind::Respiration,
            VitalValue::Spo2 { .. } => VitalKind::Spo2,
            VitalValue::BloodPressure { .. } => VitalKind::BloodPressure,
            VitalValue::Glucose { .. } => VitalKind::Glucose,
        }
    }

    /// The headline number (systolic for blood pressure).
    pub fn primary(&self) -> f64 {
        match *self {
            VitalValue::HeartRate { bpm } => bpm,
            VitalValue::Respiration { breaths_per_minute } => breaths_per_minute,
            VitalValue::Spo2 { percent, .. } => percent,
            VitalValue::BloodPressure { systolic, .. } => systolic,
            VitalValue::Glucose { mg_dl, .. } => mg_dl,
        }
    }

    /// Pulse rate carried alongside the value, if the estimator derived one.
    pub fn pulse(&self) -> Option<f64> {
        match *self {
            VitalValue::HeartRate { bpm } => Some(bpm),
            VitalValue::Spo2 { pulse_bpm, .. } | VitalValue::Glucose { pulse_bpm, .. } => {
                Some(pulse_bpm)
            }
            VitalValue::BloodPressure { heart_rate, .. } => Some(heart_rate),
            VitalValue::Respiration { .. } => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        match *self {
            VitalValue::HeartRate { bpm } => bpm.is_finite(),
            VitalValue::Respiration { breaths_per_minute } => breaths_per_minute.is_finite(),
            VitalValue::Spo2 { percent, pulse_bpm } => percent.is_finite() && pulse_bpm.is_finite(),
            VitalValue::BloodPressure {
                systolic,
                diastolic,
                heart_rate,
            } => systolic.is_finite() && diastolic.is_finite() && heart_rate.is_finite(),
            VitalValue::Glucose { mg_dl, pulse_bpm } => mg_dl.is_finite() && pulse_bpm.is_finite(),
        }
    }
}

/// Quality metadata attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    pub snr: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl Quality {
    /// Confidence derived from SNR alone, saturating at twice the threshold.
    pub fn from_snr(snr: f64, threshold: f64) -> Self {
        let confidence = if threshold > 0.0 {
            (snr / (2.0 * threshold)).clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self { snr, confidence }
    }
}

/// A value and its quality, as produced by an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: VitalValue,
    pub quality: Quality,
}

/// The engine's output unit for one completed session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalResult {
    pub kind: VitalKind,
    pub value: VitalValue,
    pub quality: Quality,
    /// Timestamp of the last frame that contributed.
    pub timestamp: Duration,
    /// Acquisition time of the successful attempt.
    pub elapsed: Duration,
}
