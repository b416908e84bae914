//! Latest sensor readings shared between the engine and its collaborators.
//!
//! The holder is an explicit handle: whoever needs the readings is given a
//! clone of it. Writers are the engine (completed results, live red level)
//! and any external infrared source.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::VitalsError;
use crate::vital::{VitalResult, VitalValue};

/// Snapshot of the most recent values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestReadings {
    pub heart_rate: Option<f64>,
    pub spo2: Option<f64>,
    pub red_level: Option<f64>,
    pub infrared: Option<f64>,
}

/// Cloneable, thread-safe handle around [`LatestReadings`].
#[derive(Debug, Clone, Default)]
pub struct SensorReadings {
    inner: Arc<RwLock<LatestReadings>>,
}

impl SensorReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Result<LatestReadings, VitalsError> {
        Ok(*self.inner.read()?)
    }

    /// Folds a completed result into the readings.
    pub fn publish(&self, result: &VitalResult) -> Result<(), VitalsError> {
        let mut readings = self.inner.write()?;
        match result.value {
            VitalValue::HeartRate { bpm } => readings.heart_rate = Some(bpm),
            VitalValue::Spo2 { percent, pulse_bpm } => {
                readings.spo2 = Some(percent);
                readings.heart_rate = Some(pulse_bpm);
            }
            VitalValue::BloodPressure { heart_rate, .. } => readings.heart_rate = Some(heart_rate),
            VitalValue::Respiration { .. } | VitalValue::Glucose { .. } => {}
        }
        Ok(())
    }

    pub fn set_red_level(&self, level: f64) -> Result<(), VitalsError> {
        self.inner.write()?.red_level = Some(level);
        Ok(())
    }

    pub fn set_infrared(&self, level: f64) -> Result<(), VitalsError> {
        self.inner.write()?.infrared = Some(level);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), VitalsError> {
        *self.inner.write()? = LatestReadings::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vital::{Quality, VitalKind};
    use std::time::Duration;

    fn result(value: VitalValue) -> VitalResult {
        VitalResult {
            kind: value.kind(),
            value,
            quality: Quality {
                snr: 10.0,
                confidence: 1.0,
            },
            timestamp: Duration::ZERO,
            elapsed: Duration::from_secs(9),
        }
    }

    #[test]
    fn clones_share_state() {
        let readings = SensorReadings::new();
        let reader = readings.clone();
        readings.publish(&result(VitalValue::HeartRate { bpm: 72.0 })).unwrap();
        readings.set_infrared(60.0).unwrap();

        let snap = reader.snapshot().unwrap();
        assert_eq!(snap.heart_rate, Some(72.0));
        assert_eq!(snap.infrared, Some(60.0));
        assert_eq!(snap.spo2, None);
    }

    #[test]
    fn spo2_result_updates_pulse_too() {
        let readings = SensorReadings::new();
        let r = result(VitalValue::Spo2 {
            percent: 97.0,
            pulse_bpm: 66.0,
        });
        assert_eq!(r.kind, VitalKind::Spo2);
        readings.publish(&r).unwrap();
        let snap = readings.snapshot().unwrap();
        assert_eq!((snap.spo2, snap.heart_rate), (Some(97.0), Some(66.0)));

        readings.clear().unwrap();
        assert_eq!(readings.snapshot().unwrap(), LatestReadings::default());
    }
}
