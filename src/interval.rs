//! Sampling cadence validation for a shared timestamp axis.

use chrono::{DateTime, Utc};

use crate::error::{EstimationError, IntervalIssue};

pub const MINUTES_PER_DAY: i64 = 24 * 60;
pub const SUPPORTED_INTERVALS_MINUTES: [i64; 2] = [15, 30];

/// Returns the common cadence, in minutes, of an ascending timestamp sequence.
///
/// Every consecutive pair is checked; the first pair fixes the expected delta.
pub fn check_intervals(timestamps: &[DateTime<Utc>]) -> Result<i64, EstimationError> {
    if timestamps.len() < 2 {
        return Err(EstimationError::InsufficientData {
            what: "interval validation timestamps",
            required: 2,
            found: timestamps.len(),
        });
    }

    let mut expected_minutes: Option<i64> = None;
    for (position, pair) in timestamps.windows(2).enumerate() {
        let found_minutes = pair_minutes(position, pair[0], pair[1])?;
        match expected_minutes {
            None => expected_minutes = Some(found_minutes),
            Some(expected) if expected != found_minutes => {
                return Err(EstimationError::IntervalInconsistency(
                    IntervalIssue::Mismatch {
                        position,
                        expected_minutes: expected,
                        found_minutes,
                    },
                ));
            }
            Some(_) => {}
        }
    }

    let minutes = expected_minutes.unwrap_or_default();
    if !SUPPORTED_INTERVALS_MINUTES.contains(&minutes) {
        return Err(EstimationError::IntervalInconsistency(
            IntervalIssue::Unsupported { minutes },
        ));
    }

    Ok(minutes)
}

pub fn daily_sample_count(delta_minutes: i64) -> Result<usize, EstimationError> {
    if delta_minutes <= 0 {
        return Err(EstimationError::InvalidDelta(delta_minutes));
    }
    Ok((MINUTES_PER_DAY / delta_minutes) as usize)
}

/// Validates the cadence of `timestamps` and derives the number of samples per day.
pub fn validate_interval(timestamps: &[DateTime<Utc>]) -> Result<usize, EstimationError> {
    let minutes = check_intervals(timestamps)?;
    daily_sample_count(minutes)
}

fn pair_minutes(
    position: usize,
    earlier: DateTime<Utc>,
    later: DateTime<Utc>,
) -> Result<i64, EstimationError> {
    let delta_seconds = (later - earlier).num_seconds();
    if delta_seconds <= 0 || delta_seconds % 60 != 0 {
        return Err(EstimationError::IntervalInconsistency(
            IntervalIssue::Irregular {
                position,
                delta_seconds,
            },
        ));
    }
    Ok(delta_seconds / 60)
}
