//! # Session Controller
//!
//! One generic acquisition state machine for every vital sign. The session
//! owns the extractor, the sample buffer and the estimator; it decides when
//! enough data has been collected, asks the estimator for a verdict, and
//! turns that verdict into an event for the caller.
//!
//! ## Features
//! - Timer anchored on the first accepted sample of the current attempt
//! - Sampling-frequency estimate trusted only after a warm-up period
//! - Window trimming per estimator before each analysis
//! - Restart, timeout and completion handling with a full state reset

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::buffer::SampleBuffer;
use crate::channel::{ChannelExtractor, ChannelSample};
use crate::config::EngineConfig;
use crate::error::VitalsError;
use crate::estimators::{AnalysisContext, Estimator, Rejection, Verdict, VitalEstimator};
use crate::frame::Frame;
use crate::profile::AnthropometricProfile;
use crate::vital::{VitalKind, VitalResult};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No sample accepted yet in this attempt; the timer has not started.
    Waiting,
    Collecting,
    /// A result was emitted. Further frames are ignored until reset.
    Completed,
}

/// Acquisition progress, emitted for every accepted frame that does not
/// finish the session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub kind: VitalKind,
    /// Elapsed time over the maximum collection window, capped at 100.
    pub percent: f64,
    pub elapsed: Duration,
    pub frames: usize,
    pub sampling_freq: f64,
    /// Latest plausible value that was not final yet.
    pub candidate: Option<f64>,
    pub rejection: Option<Rejection>,
}

/// The maximum collection window ran out without an accepted result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Failure {
    pub kind: VitalKind,
    pub last_rejection: Option<Rejection>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Progress(ProgressUpdate),
    /// The frame was dark, saturated, or failed the estimator's contact gate.
    NoContact,
    Completed(VitalResult),
    Failed(Failure),
    /// Collected data was discarded and the timer restarted.
    Restarted(Rejection),
}

/// Acquisition state for one vital sign.
#[derive(Debug, Clone)]
pub struct Session {
    estimator: Estimator,
    extractor: ChannelExtractor,
    buffer: SampleBuffer,
    warmup: Duration,
    anchor: Option<Duration>,
    frames: usize,
    sampling_freq: f64,
    candidate: Option<f64>,
    last_rejection: Option<Rejection>,
    state: SessionState,
}

impl Session {
    pub fn new(kind: VitalKind, config: &EngineConfig, profile: AnthropometricProfile) -> Self {
        Self {
            estimator: Estimator::new(kind, config, profile),
            extractor: ChannelExtractor::new(config.extractor.clone()),
            buffer: SampleBuffer::new(config.buffer.max_samples),
            warmup: Duration::try_from_secs_f64(config.buffer.warmup_seconds.max(0.0)).unwrap_or(Duration::ZERO),
            anchor: None,
            frames: 0,
            sampling_freq: 0.0,
            candidate: None,
            last_rejection: None,
            state: SessionState::Waiting,
        }
    }

    pub fn kind(&self) -> VitalKind {
        self.estimator.kind()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accepted frames in the current attempt.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sampling_freq(&self) -> f64 {
        self.sampling_freq
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn latest_sample(&self) -> Option<&ChannelSample> {
        self.buffer.latest()
    }

    /// Clears every buffer, history and counter, as if freshly created.
    pub fn reset(&mut self) {
        self.estimator.reset();
        self.extractor.reset();
        self.buffer.clear();
        self.anchor = None;
        self.frames = 0;
        self.sampling_freq = 0.0;
        self.candidate = None;
        self.last_rejection = None;
        self.state = SessionState::Waiting;
    }

    /// Feeds one frame through the pipeline.
    ///
    /// Input errors are returned without touching any state. `Ok(None)` means
    /// the session already completed.
    pub fn process(&mut self, frame: &Frame<'_>) -> Result<Option<SessionEvent>, VitalsError> {
        if self.state == SessionState::Completed {
            return Ok(None);
        }

        // --- Step 1: Decode and apply the contact gates ---
        let sample = match self.extractor.extract(frame)? {
            Some(sample) if self.estimator.accepts(&sample) => sample,
            _ => return Ok(Some(self.no_contact(frame.timestamp))),
        };

        // --- Step 2: Buffer the sample and update timing ---
        let anchor = *self.anchor.get_or_insert(sample.timestamp);
        self.buffer.push(sample);
        self.frames += 1;
        self.state = SessionState::Collecting;

        let elapsed = sample.timestamp.saturating_sub(anchor);
        if elapsed >= self.warmup && self.frames > 1 && !elapsed.is_zero() {
            self.sampling_freq = (self.frames - 1) as f64 / elapsed.as_secs_f64();
        }

        let deadline = elapsed >= self.estimator.max_duration();
        let ready = elapsed >= self.estimator.min_duration() && self.frames >= self.estimator.min_frames();
        if !ready && !deadline {
            return Ok(Some(SessionEvent::Progress(self.progress(elapsed))));
        }

        // --- Step 3: Trim the window and analyze ---
        let window = self.estimator.window_len(self.sampling_freq, elapsed);
        self.buffer.trim_to_newest(window);
        let ctx = AnalysisContext {
            buffer: &self.buffer,
            sampling_freq: self.sampling_freq,
            elapsed,
            deadline_reached: deadline,
        };
        let verdict = self.estimator.analyze(&ctx);

        // --- Step 4: Turn the verdict into an event ---
        Ok(Some(self.apply(verdict, sample.timestamp, elapsed, deadline)))
    }

    fn apply(&mut self, verdict: Verdict, timestamp: Duration, elapsed: Duration, deadline: bool) -> SessionEvent {
        let kind = self.kind();
        match verdict {
            Verdict::Final(measurement) if measurement.value.is_finite() => {
                info!(
                    "[SESSION] {} complete: {:?} after {:.1}s ({} frames, {:.1} Hz)",
                    kind.tag(),
                    measurement.value,
                    elapsed.as_secs_f64(),
                    self.frames,
                    self.sampling_freq
                );
                self.state = SessionState::Completed;
                SessionEvent::Completed(VitalResult {
                    kind,
                    value: measurement.value,
                    quality: measurement.quality,
                    timestamp,
                    elapsed,
                })
            }
            Verdict::Final(_) => self.reject(Rejection::NonFinite, elapsed, deadline),
            Verdict::Candidate { value, snr } => {
                debug!("[SESSION] {} candidate {value:.1} (snr {snr:.2})", kind.tag());
                self.candidate = Some(value);
                if deadline {
                    self.fail(elapsed)
                } else {
                    SessionEvent::Progress(self.progress(elapsed))
                }
            }
            Verdict::Reject(rejection) => self.reject(rejection, elapsed, deadline),
            Verdict::Restart(rejection) => {
                info!("[SESSION] {} restarting: {rejection}", kind.tag());
                self.reset();
                self.last_rejection = Some(rejection);
                SessionEvent::Restarted(rejection)
            }
        }
    }

    fn reject(&mut self, rejection: Rejection, elapsed: Duration, deadline: bool) -> SessionEvent {
        debug!("[SESSION] {} rejected: {rejection}", self.kind().tag());
        self.last_rejection = Some(rejection);
        if deadline {
            self.fail(elapsed)
        } else {
            SessionEvent::Progress(self.progress(elapsed))
        }
    }

    fn no_contact(&mut self, timestamp: Duration) -> SessionEvent {
        if let Some(anchor) = self.anchor {
            let elapsed = timestamp.saturating_sub(anchor);
            if elapsed >= self.estimator.max_duration() {
                return self.fail(elapsed);
            }
        }
        SessionEvent::NoContact
    }

    fn fail(&mut self, elapsed: Duration) -> SessionEvent {
        let failure = Failure {
            kind: self.kind(),
            last_rejection: self.last_rejection,
            elapsed,
        };
        warn!(
            "[SESSION] {} timed out after {:.1}s, last rejection: {:?}",
            failure.kind.tag(),
            elapsed.as_secs_f64(),
            failure.last_rejection
        );
        self.reset();
        SessionEvent::Failed(failure)
    }

    fn progress(&self, elapsed: Duration) -> ProgressUpdate {
        let max = self.estimator.max_duration().as_secs_f64();
        let percent = if max > 0.0 {
            (elapsed.as_secs_f64() / max * 100.0).min(100.0)
        } else {
            100.0
        };
        ProgressUpdate {
            kind: self.kind(),
            percent,
            elapsed,
            frames: self.frames,
            sampling_freq: self.sampling_freq,
            candidate: self.candidate,
            rejection: self.last_rejection,
        }
    }
}
