//! # Capture Plumbing
//!
//! Moves frames from an external source to the engine on dedicated threads.
//! The producer hands frames over through a one-slot channel; the consumer
//! feeds them into the engine and forwards session events.
//!
//! ## Features
//! - `FrameSource` trait for camera or file collaborators
//! - Live delivery that drops frames while the consumer is busy
//! - Lossless replay delivery for recorded input
//! - Session worker with a shutdown channel
//! - Blocking helper that drives one session end to end

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};
use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::engine::{SessionHandle, VitalsEngine};
use crate::error::VitalsError;
use crate::frame::FrameBuffer;
use crate::profile::AnthropometricProfile;
use crate::session::{Failure, SessionEvent};
use crate::vital::{VitalKind, VitalResult};

/// Anything that yields NV21 frames, such as a camera wrapper or a recording.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>>;
}

/// How the pump hands frames to a slow consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Paced to the frame timestamps; frames are dropped while the consumer
    /// still holds the previous one.
    Live,
    /// As fast as the consumer accepts them, never dropping.
    Replay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Producer thread moving frames from a [`FrameSource`] into a one-slot channel.
pub struct FramePump {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<PumpStats>>,
}

impl FramePump {
    pub fn spawn<S>(mut source: S, mode: DeliveryMode) -> (Self, Receiver<FrameBuffer>)
    where
        S: FrameSource + 'static,
    {
        let (tx, rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            let mut stats = PumpStats::default();
            let start = Instant::now();
            let mut origin = None;

            while !stop_flag.load(Ordering::Relaxed) {
                let Some(frame) = source.next_frame()? else {
                    break;
                };
                match mode {
                    DeliveryMode::Live => {
                        let origin = *origin.get_or_insert(frame.timestamp);
                        let due = start + frame.timestamp.saturating_sub(origin);
                        let now = Instant::now();
                        if due > now {
                            thread::sleep(due - now);
                        }
                        match tx.try_send(frame) {
                            Ok(()) => stats.delivered += 1,
                            Err(TrySendError::Full(frame)) => {
                                stats.dropped += 1;
                                trace!("[CAPTURE] consumer busy, dropped frame at {:?}", frame.timestamp);
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        }
                    }
                    DeliveryMode::Replay => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                        stats.delivered += 1;
                    }
                }
            }

            debug!(
                "[CAPTURE] pump finished: {} delivered, {} dropped",
                stats.delivered, stats.dropped
            );
            Ok(stats)
        });

        (Self { stop, thread }, rx)
    }

    /// Asks the producer to stop after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn join(self) -> Result<PumpStats> {
        self.thread
            .join()
            .map_err(|_| anyhow!("frame pump thread panicked"))?
    }
}

/// Consumer thread running one session over incoming frames.
pub struct SessionWorker {
    events: Receiver<SessionEvent>,
    shutdown: Sender<()>,
    thread: JoinHandle<u64>,
}

impl SessionWorker {
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Stops the worker; any session in progress is left to the caller.
    pub fn shutdown(&self) {
        let _ = self.shutdown.try_send(());
    }

    /// Waits for the worker and returns how many frames it handled.
    pub fn join(self) -> Result<u64> {
        self.thread
            .join()
            .map_err(|_| anyhow!("session worker thread panicked"))
    }
}

/// Spawns the consumer for `handle`.
///
/// The worker ends when the session completes, when the frame channel
/// closes, when the session is cancelled or replaced, or on shutdown.
/// Failures are forwarded and the worker keeps going, since the session
/// resets itself and starts a new attempt.
pub fn spawn_session_worker(
    engine: Arc<VitalsEngine>,
    handle: SessionHandle,
    frames: Receiver<FrameBuffer>,
) -> SessionWorker {
    let (events_tx, events) = unbounded();
    let (shutdown, shutdown_rx) = bounded::<()>(1);

    let thread = thread::spawn(move || {
        info!("[CAPTURE] worker started for session {}", handle.id);
        let mut handled = 0u64;
        loop {
            select! {
                recv(frames) -> msg => {
                    let Ok(frame) = msg else {
                        debug!("[CAPTURE] frame source closed");
                        break;
                    };
                    handled += 1;
                    match engine.process_frame(&handle, &frame.view()) {
                        Ok(Some(event)) => {
                            let done = matches!(event, SessionEvent::Completed(_));
                            if events_tx.send(event).is_err() || done {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(VitalsError::UnknownSession(id)) => {
                            info!("[CAPTURE] session {id} no longer active");
                            break;
                        }
                        Err(e) => warn!("[CAPTURE] skipped frame: {e}"),
                    }
                }
                recv(shutdown_rx) -> _ => {
                    info!("[CAPTURE] worker received shutdown signal");
                    break;
                }
            }
        }
        info!("[CAPTURE] worker finished after {handled} frames");
        handled
    });

    SessionWorker {
        events,
        shutdown,
        thread,
    }
}

/// How a driven session ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed(VitalResult),
    Failed(Failure),
    /// The source ran out of frames first.
    SourceExhausted,
}

/// Measures `kind` from `source` on a pump/worker thread pair, calling
/// `on_event` for every event, until the first completion or failure.
pub fn run_session<S>(
    engine: &Arc<VitalsEngine>,
    kind: VitalKind,
    profile: Option<AnthropometricProfile>,
    source: S,
    mode: DeliveryMode,
    mut on_event: impl FnMut(&SessionEvent),
) -> Result<SessionOutcome>
where
    S: FrameSource + 'static,
{
    let handle = engine.start_session(kind, profile)?;
    let (pump, frames) = FramePump::spawn(source, mode);
    let worker = spawn_session_worker(Arc::clone(engine), handle, frames);

    let mut outcome = SessionOutcome::SourceExhausted;
    for event in worker.events().iter() {
        on_event(&event);
        match event {
            SessionEvent::Completed(result) => {
                outcome = SessionOutcome::Completed(result);
                break;
            }
            SessionEvent::Failed(failure) => {
                outcome = SessionOutcome::Failed(failure);
                break;
            }
            _ => {}
        }
    }

    pump.stop();
    worker.shutdown();
    let handled = worker.join()?;
    let stats = pump.join()?;
    engine.cancel_session(&handle)?;
    debug!(
        "[CAPTURE] {kind} session {}: {handled} frames handled, {} dropped at the source, {} dropped by the engine",
        handle.id,
        stats.dropped,
        engine.dropped_frames()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{FingertipConfig, SyntheticFingertip};

    fn source(fps: f64, duration_secs: f64) -> SyntheticFingertip {
        SyntheticFingertip::new(FingertipConfig {
            fps,
            duration_secs,
            ..FingertipConfig::default()
        })
    }

    #[test]
    fn replay_is_lossless() {
        let (pump, rx) = FramePump::spawn(source(30.0, 2.0), DeliveryMode::Replay);
        let received = rx.iter().count();
        let stats = pump.join().unwrap();
        assert_eq!(received, 60);
        assert_eq!(stats, PumpStats { delivered: 60, dropped: 0 });
    }

    #[test]
    fn live_drops_while_consumer_is_busy() {
        let (pump, rx) = FramePump::spawn(source(1000.0, 0.05), DeliveryMode::Live);
        let stats = pump.join().unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 49);
        assert_eq!(rx.try_iter().count(), 1);
    }

    struct Broken;

    impl FrameSource for Broken {
        fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
            Err(anyhow!("camera disconnected"))
        }
    }

    #[test]
    fn source_errors_surface_on_join() {
        let (pump, rx) = FramePump::spawn(Broken, DeliveryMode::Replay);
        assert_eq!(rx.iter().count(), 0);
        let err = pump.join().unwrap_err();
        assert!(err.to_string().contains("camera disconnected"));
    }
}
