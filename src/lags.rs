//! Lagged self-channels and training windows for unknown meters.
//!
//! Lags are produced by shifting along column indices of the shared grid. History
//! before the first column is unavailable, so the earliest rows of a window never
//! see values from the end of the series. The first `daily_count * 7` columns form
//! the warm-up span and never reach a training window.

use serde::{Deserialize, Serialize};

use crate::alignment::{MeterId, VoltageMatrix};
use crate::error::EstimationError;

pub const WARMUP_DAYS: usize = 7;
pub const LAG_CHANNEL_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LagChannel {
    OneDay,
    TwoDays,
    SevenDays,
}

impl LagChannel {
    pub const ALL: [LagChannel; LAG_CHANNEL_COUNT] =
        [LagChannel::OneDay, LagChannel::TwoDays, LagChannel::SevenDays];

    pub fn days(self) -> usize {
        match self {
            Self::OneDay => 1,
            Self::TwoDays => 2,
            Self::SevenDays => 7,
        }
    }

    pub fn offset_columns(self, daily_count: usize) -> usize {
        daily_count * self.days()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OneDay => "lag_1d",
            Self::TwoDays => "lag_2d",
            Self::SevenDays => "lag_7d",
        }
    }
}

pub fn warmup_columns(daily_count: usize) -> usize {
    daily_count * WARMUP_DAYS
}

/// Channel names in regressor order: three lags, then one per known meter.
pub fn regressor_names(known_ids: &[MeterId]) -> Vec<String> {
    LagChannel::ALL
        .iter()
        .map(|channel| channel.name().to_string())
        .chain(known_ids.iter().cloned())
        .collect()
}

/// Three lag channels of an unknown-meter matrix, each U×T row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LagTensor {
    rows: usize,
    cols: usize,
    channels: [Vec<Option<f64>>; LAG_CHANNEL_COUNT],
}

impl LagTensor {
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channel_row(&self, channel: LagChannel, row: usize) -> &[Option<f64>] {
        let data = &self.channels[channel_index(channel)];
        &data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn get(&self, channel: LagChannel, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.channels[channel_index(channel)][row * self.cols + col]
    }
}

pub fn build_lag_tensor(unknown: &VoltageMatrix, daily_count: usize) -> LagTensor {
    let cols = unknown.cols();
    let channels = LagChannel::ALL.map(|channel| {
        let offset = channel.offset_columns(daily_count);
        let mut data = Vec::with_capacity(unknown.rows() * cols);
        for row in 0..unknown.rows() {
            data.extend(shift_right(unknown.row(row), offset));
        }
        data
    });

    LagTensor {
        rows: unknown.rows(),
        cols,
        channels,
    }
}

/// Post-warm-up design rows and targets for one unknown meter.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterTrainingWindow {
    pub meter_id: MeterId,
    /// Grid column of the first row in this window.
    pub first_column: usize,
    pub regressors: Vec<Vec<Option<f64>>>,
    pub targets: Vec<Option<f64>>,
}

impl MeterTrainingWindow {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Rows where every regressor and the target are available.
    pub fn complete_rows(&self) -> impl Iterator<Item = (Vec<f64>, f64)> + '_ {
        self.regressors
            .iter()
            .zip(&self.targets)
            .filter_map(|(regressors, target)| {
                let target = (*target)?;
                let values: Option<Vec<f64>> = regressors.iter().copied().collect();
                values.map(|values| (values, target))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaggedFeatureSet {
    pub daily_count: usize,
    pub known_ids: Vec<MeterId>,
    pub windows: Vec<MeterTrainingWindow>,
}

impl LaggedFeatureSet {
    pub fn regressor_count(&self) -> usize {
        LAG_CHANNEL_COUNT + self.known_ids.len()
    }
}

pub fn build_feature_set(
    known: &VoltageMatrix,
    unknown: &VoltageMatrix,
    daily_count: usize,
) -> Result<LaggedFeatureSet, EstimationError> {
    if daily_count == 0 {
        return Err(EstimationError::InsufficientData {
            what: "samples per day",
            required: 1,
            found: 0,
        });
    }
    if known.cols() != unknown.cols() && known.rows() > 0 && unknown.rows() > 0 {
        return Err(EstimationError::DimensionMismatch {
            what: "known/unknown timestamp columns",
            expected: unknown.cols(),
            found: known.cols(),
        });
    }

    let lags = build_lag_tensor(unknown, daily_count);
    let first_column = warmup_columns(daily_count).min(unknown.cols());

    let windows = (0..unknown.rows())
        .map(|row| {
            let regressors = (first_column..unknown.cols())
                .map(|col| {
                    LagChannel::ALL
                        .iter()
                        .map(|channel| lags.get(*channel, row, col))
                        .chain((0..known.rows()).map(|k| known.get(k, col)))
                        .collect()
                })
                .collect();
            let targets = unknown.row(row)[first_column..].to_vec();

            MeterTrainingWindow {
                meter_id: unknown.meter_ids()[row].clone(),
                first_column,
                regressors,
                targets,
            }
        })
        .collect();

    Ok(LaggedFeatureSet {
        daily_count,
        known_ids: known.meter_ids().to_vec(),
        windows,
    })
}

fn shift_right(row: &[Option<f64>], offset: usize) -> impl Iterator<Item = Option<f64>> + '_ {
    (0..row.len()).map(move |col| col.checked_sub(offset).and_then(|src| row[src]))
}

fn channel_index(channel: LagChannel) -> usize {
    match channel {
        LagChannel::OneDay => 0,
        LagChannel::TwoDays => 1,
        LagChannel::SevenDays => 2,
    }
}
