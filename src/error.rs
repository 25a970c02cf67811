use thiserror::Error;

use crate::body::BodyId;

/// Everything that can go wrong inside the engine.
///
/// Geometric sanity failures never surface here; they are handled by dropping
/// the offending contact pair inside the step driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input geometry.
    #[error("malformed geometry: {0}")]
    Geometry(String),

    /// Body kind or state size mismatch at state initialisation.
    #[error("body {id:?}: {what} mismatch when reading state (stored {stored}, expected {expected})")]
    StateMismatch {
        /// Body whose record did not match.
        id: BodyId,
        /// Which quantity disagreed.
        what: &'static str,
        /// Value found in the frame.
        stored: usize,
        /// Value the live body requires.
        expected: usize,
    },

    /// Non-finite configuration or velocity after a step.
    #[error("body {0:?} has a non-finite state")]
    NonFiniteState(BodyId),

    /// Time step above the critical estimate of a body.
    #[error("time step {step} exceeds the critical estimate {critical} of body {id:?}")]
    CriticalStep {
        /// Offending body.
        id: BodyId,
        /// Requested step.
        step: f64,
        /// Critical estimate.
        critical: f64,
    },

    /// Frame store failure.
    #[error("frame store: {0}")]
    Io(#[from] std::io::Error),

    /// A label expected in the frame store was not found.
    #[error("no such frame: label {0:?} not found")]
    NoSuchFrame(String),

    /// Frame store contents do not follow the expected layout.
    #[error("frame store format error: {0}")]
    FileFormat(String),

    /// Output files are too old for the requested operation.
    #[error("stored IO version {0} is too old (need at least {1})")]
    IoVersion(u32, u32),

    /// Invalid caller-supplied label pattern.
    #[error("label pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, Error>;
