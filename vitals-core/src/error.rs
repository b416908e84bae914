use thiserror::Error;

use crate::vital::VitalKind;

/// Errors raised by the core for malformed input or misuse of the session API.
///
/// Signal-quality problems are not errors; they travel as
/// [`Rejection`](crate::estimators::Rejection) values inside verdicts and events.
#[derive(Debug, Error)]
pub enum VitalsError {
    #[error("frame buffer is empty")]
    EmptyFrame,
    #[error("unsupported frame dimensions {width}x{height}: both must be even and non-zero")]
    UnsupportedDimensions { width: usize, height: usize },
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },
    #[error("unknown vital sign {0:?}")]
    UnknownVital(String),
    #[error("session {0} is not the active session")]
    UnknownSession(u64),
    #[error("{actual} result does not belong to the current step (expected {expected:?})")]
    OutOfSequence {
        expected: Option<VitalKind>,
        actual: VitalKind,
    },
    #[error("session state lock was poisoned by a panicking worker")]
    Poisoned,
    #[error("calibration needs at least {needed} paired points, got {actual}")]
    NotEnoughPoints { needed: usize, actual: usize },
    #[error("calibration fit is degenerate: {0}")]
    DegenerateFit(String),
}

impl<T> From<std::sync::PoisonError<T>> for VitalsError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        VitalsError::Poisoned
    }
}
