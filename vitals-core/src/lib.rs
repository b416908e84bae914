// vitals-core/src/lib.rs

//! The core logic for camera-based vital-sign measurement.
//! This crate turns fingertip video frames into heart rate, respiration,
//! SpO₂, blood pressure and a glucose index. It is completely headless:
//! cameras, screens and storage are external collaborators.

pub mod autocorr;
pub mod buffer;
pub mod capture;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimators;
pub mod fft;
pub mod frame;
pub mod preprocess;
pub mod profile;
pub mod readings;
pub mod sequence;
pub mod session;
pub mod synthetic;
pub mod vital;

pub use capture::{DeliveryMode, FramePump, FrameSource, SessionOutcome, run_session, spawn_session_worker};
pub use config::EngineConfig;
pub use engine::{SessionHandle, VitalsEngine};
pub use error::VitalsError;
pub use estimators::{Rejection, Verdict};
pub use frame::{Frame, FrameBuffer};
pub use profile::{AnthropometricProfile, Gender, MealTiming, MemoryProfileStore, ProfileStore};
pub use readings::{LatestReadings, SensorReadings};
pub use sequence::{StepOutcome, VitalSignsReport, VitalSignsSequence};
pub use session::{Failure, ProgressUpdate, Session, SessionEvent};
pub use vital::{Quality, VitalKind, VitalResult, VitalValue};
