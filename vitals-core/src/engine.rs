//! # Vitals Engine
//!
//! Thread-safe facade over a single active [`Session`]. Vital signs are
//! measured one at a time; starting a session replaces any previous one.
//!
//! Frame handling is single-flight: a frame that arrives while the previous
//! one is still being processed is dropped, never queued.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::VitalsError;
use crate::estimators::GlucoseModel;
use crate::frame::Frame;
use crate::profile::AnthropometricProfile;
use crate::readings::SensorReadings;
use crate::session::{Session, SessionEvent};
use crate::vital::VitalKind;

/// Identifies one started session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: u64,
    pub kind: VitalKind,
}

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    session: Session,
}

/// Clears the busy flag when processing ends, including on unwind.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct VitalsEngine {
    config: EngineConfig,
    active: Mutex<Option<ActiveSession>>,
    busy: AtomicBool,
    next_id: AtomicU64,
    dropped: AtomicU64,
    readings: SensorReadings,
}

impl VitalsEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_readings(config, SensorReadings::new())
    }

    /// Builds an engine that publishes into an existing readings holder.
    pub fn with_readings(config: EngineConfig, readings: SensorReadings) -> Self {
        Self {
            config,
            active: Mutex::new(None),
            busy: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            readings,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn readings(&self) -> &SensorReadings {
        &self.readings
    }

    /// Frames dropped because the engine was busy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Starts measuring `kind`, replacing any session in progress. Without a
    /// profile the default anthropometrics are used.
    pub fn start_session(
        &self,
        kind: VitalKind,
        profile: Option<AnthropometricProfile>,
    ) -> Result<SessionHandle, VitalsError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(kind, &self.config, profile.unwrap_or_default());

        let mut active = self.active.lock()?;
        if let Some(previous) = active.take() {
            info!(
                "[ENGINE] session {} ({}) replaced by session {id}",
                previous.id,
                previous.session.kind().tag()
            );
        }
        *active = Some(ActiveSession { id, session });
        info!("[ENGINE] session {id} started: {kind}");
        Ok(SessionHandle { id, kind })
    }

    /// Drops the session without emitting a result. Returns `false` when the
    /// handle no longer refers to the active session.
    pub fn cancel_session(&self, handle: &SessionHandle) -> Result<bool, VitalsError> {
        let mut active = self.active.lock()?;
        if !active.as_ref().is_some_and(|current| current.id == handle.id) {
            return Ok(false);
        }
        *active = None;
        info!("[ENGINE] session {} cancelled", handle.id);
        Ok(true)
    }

    /// Feeds one frame to the session behind `handle`.
    ///
    /// Returns `Ok(None)` when the frame was dropped because another frame is
    /// in flight, or when the session has already completed.
    pub fn process_frame(
        &self,
        handle: &SessionHandle,
        frame: &Frame<'_>,
    ) -> Result<Option<SessionEvent>, VitalsError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("[ENGINE] busy, dropped frame at {:?} ({dropped} total)", frame.timestamp);
            return Ok(None);
        }
        let _busy = BusyGuard(&self.busy);

        let mut active = self.active.lock()?;
        let current = match active.as_mut() {
            Some(current) if current.id == handle.id => current,
            _ => return Err(VitalsError::UnknownSession(handle.id)),
        };

        let event = current.session.process(frame)?;
        // Only a sample appended for this frame carries a fresh red level.
        if let Some(sample) = current
            .session
            .latest_sample()
            .filter(|sample| sample.timestamp == frame.timestamp)
        {
            self.readings.set_red_level(sample.red)?;
        }
        if let Some(SessionEvent::Completed(result)) = &event {
            debug!("[ENGINE] publishing {} result", result.kind.tag());
            self.readings.publish(result)?;
        }
        Ok(event)
    }

    /// Glucose display value from the latest SpO₂ and infrared readings, if
    /// an SpO₂ reading exists.
    pub fn glucose_display(&self) -> Result<Option<f64>, VitalsError> {
        let readings = self.readings.snapshot()?;
        let model = GlucoseModel::new(self.config.glucose.clone());
        Ok(readings.spo2.map(|spo2| model.display(spo2, readings.infrared)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::uniform_frame;
    use std::time::Duration;

    fn engine() -> VitalsEngine {
        VitalsEngine::new(EngineConfig::default())
    }

    #[test]
    fn handles_are_checked() {
        let engine = engine();
        let first = engine.start_session(VitalKind::HeartRate, None).unwrap();
        let second = engine.start_session(VitalKind::Spo2, None).unwrap();
        assert_ne!(first.id, second.id);

        let data = uniform_frame(8, 8, 110, 170, 120);
        let frame = Frame::new(&data, 8, 8, Duration::ZERO);
        assert!(matches!(
            engine.process_frame(&first, &frame),
            Err(VitalsError::UnknownSession(id)) if id == first.id
        ));
        assert!(engine.process_frame(&second, &frame).unwrap().is_some());

        assert!(!engine.cancel_session(&first).unwrap());
        assert!(engine.cancel_session(&second).unwrap());
        assert!(engine.process_frame(&second, &frame).is_err());
    }

    #[test]
    fn busy_engine_drops_frames() {
        let engine = engine();
        let handle = engine.start_session(VitalKind::HeartRate, None).unwrap();
        let data = uniform_frame(8, 8, 110, 170, 120);
        let frame = Frame::new(&data, 8, 8, Duration::ZERO);

        engine.busy.store(true, Ordering::Release);
        assert_eq!(engine.process_frame(&handle, &frame).unwrap(), None);
        assert_eq!(engine.dropped_frames(), 1);

        engine.busy.store(false, Ordering::Release);
        assert!(engine.process_frame(&handle, &frame).unwrap().is_some());
        assert!(!engine.busy.load(Ordering::Acquire));
    }

    #[test]
    fn busy_flag_released_after_errors() {
        let engine = engine();
        let handle = engine.start_session(VitalKind::HeartRate, None).unwrap();
        let frame = Frame::new(&[], 8, 8, Duration::ZERO);
        assert!(matches!(
            engine.process_frame(&handle, &frame),
            Err(VitalsError::EmptyFrame)
        ));
        assert!(!engine.busy.load(Ordering::Acquire));
    }

    #[test]
    fn red_level_and_glucose_display() {
        let readings = SensorReadings::new();
        let engine = VitalsEngine::with_readings(EngineConfig::default(), readings.clone());
        let handle = engine.start_session(VitalKind::Glucose, None).unwrap();
        let data = uniform_frame(8, 8, 110, 170, 120);
        engine
            .process_frame(&handle, &Frame::new(&data, 8, 8, Duration::ZERO))
            .unwrap();
        assert!(readings.snapshot().unwrap().red_level.is_some());

        assert_eq!(engine.glucose_display().unwrap(), None);
        readings
            .publish(&crate::vital::VitalResult {
                kind: VitalKind::Spo2,
                value: crate::vital::VitalValue::Spo2 {
                    percent: 95.0,
                    pulse_bpm: 70.0,
                },
                quality: crate::vital::Quality {
                    snr: 8.0,
                    confidence: 1.0,
                },
                timestamp: Duration::ZERO,
                elapsed: Duration::from_secs(12),
            })
            .unwrap();
        readings.set_infrared(60.0).unwrap();
        assert_eq!(engine.glucose_display().unwrap(), Some(105.0));
    }

    #[test]
    fn no_contact_frames_leave_red_level_alone() {
        let readings = SensorReadings::new();
        let engine = VitalsEngine::with_readings(EngineConfig::default(), readings.clone());
        let handle = engine.start_session(VitalKind::HeartRate, None).unwrap();
        let finger = uniform_frame(8, 8, 110, 170, 120);
        let dark = uniform_frame(8, 8, 10, 128, 128);

        engine
            .process_frame(&handle, &Frame::new(&finger, 8, 8, Duration::ZERO))
            .unwrap();
        assert!(readings.snapshot().unwrap().red_level.is_some());

        readings.clear().unwrap();
        let event = engine
            .process_frame(&handle, &Frame::new(&dark, 8, 8, Duration::from_millis(33)))
            .unwrap();
        assert_eq!(event, Some(SessionEvent::NoContact));
        assert_eq!(readings.snapshot().unwrap().red_level, None);
    }
}
