//! Typed failures of the estimation engine.

use std::fmt;

use thiserror::Error;

use crate::alignment::MeterId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalIssue {
    /// A consecutive pair disagrees with the cadence set by the first pair.
    Mismatch {
        position: usize,
        expected_minutes: i64,
        found_minutes: i64,
    },
    /// A consecutive pair is not strictly increasing by whole minutes.
    Irregular { position: usize, delta_seconds: i64 },
    Unsupported { minutes: i64 },
}

impl fmt::Display for IntervalIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch {
                position,
                expected_minutes,
                found_minutes,
            } => write!(
                f,
                "pair {position} is {found_minutes} minutes apart, expected {expected_minutes}"
            ),
            Self::Irregular {
                position,
                delta_seconds,
            } => write!(
                f,
                "pair {position} is {delta_seconds}s apart, not a positive whole number of minutes"
            ),
            Self::Unsupported { minutes } => {
                write!(f, "cadence of {minutes} minutes is not one of 15 or 30")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    #[error("insufficient data: {what} requires at least {required}, found {found}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        found: usize,
    },
    #[error("inconsistent sampling interval: {0}")]
    IntervalInconsistency(IntervalIssue),
    #[error("invalid sampling delta: {0} minutes")]
    InvalidDelta(i64),
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("unavailable regressor {channel} for meter {meter_id}")]
    UnavailableRegressor { meter_id: MeterId, channel: String },
    #[error("least-squares solve failed: {0}")]
    Solver(&'static str),
}
