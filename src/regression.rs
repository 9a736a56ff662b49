//! Per-meter ordinary least squares over lagged features.
//!
//! Each unknown meter is fitted independently with no intercept and no
//! regularisation. The solve goes through an SVD so that rank-deficient or
//! underdetermined windows still yield the minimum-norm coefficient vector:
//! singular values at or below `eps * max(rows, cols) * sigma_max` are treated
//! as zero.

use nalgebra::{DMatrix, DVector, DVectorView};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alignment::{MeterId, VoltageMatrix};
use crate::error::EstimationError;
use crate::lags::{build_feature_set, regressor_names, LaggedFeatureSet, MeterTrainingWindow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterFit {
    pub meter_id: MeterId,
    pub usable_rows: usize,
    pub skipped_rows: usize,
    pub rank: usize,
}

/// Coefficients of a fitted model, one column per unknown meter.
///
/// Rows follow `[lag_1d, lag_2d, lag_7d, known_1 .. known_K]`; columns follow the
/// unknown-meter order used at fit time.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionModel {
    daily_count: usize,
    known_ids: Vec<MeterId>,
    unknown_ids: Vec<MeterId>,
    coefficients: DMatrix<f64>,
    fits: Vec<MeterFit>,
}

impl RegressionModel {
    pub fn daily_count(&self) -> usize {
        self.daily_count
    }

    pub fn known_ids(&self) -> &[MeterId] {
        &self.known_ids
    }

    pub fn unknown_ids(&self) -> &[MeterId] {
        &self.unknown_ids
    }

    pub fn channel_count(&self) -> usize {
        self.coefficients.nrows()
    }

    pub fn channel_names(&self) -> Vec<String> {
        regressor_names(&self.known_ids)
    }

    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.coefficients
    }

    pub fn column(&self, index: usize) -> DVectorView<'_, f64> {
        self.coefficients.column(index)
    }

    pub fn coefficients_for(&self, meter_id: &str) -> Option<DVectorView<'_, f64>> {
        let index = self.unknown_ids.iter().position(|id| id == meter_id)?;
        Some(self.coefficients.column(index))
    }

    pub fn fits(&self) -> &[MeterFit] {
        &self.fits
    }

    /// True when the meter at `index` had no complete training row.
    pub fn is_untrained(&self, index: usize) -> bool {
        self.fits
            .get(index)
            .map_or(true, |fit| fit.usable_rows == 0)
    }
}

/// Fits one coefficient vector per unknown meter.
pub fn fit(
    known: &VoltageMatrix,
    unknown: &VoltageMatrix,
    daily_count: usize,
) -> Result<RegressionModel, EstimationError> {
    let features = build_feature_set(known, unknown, daily_count)?;
    fit_feature_set(&features)
}

pub fn fit_feature_set(features: &LaggedFeatureSet) -> Result<RegressionModel, EstimationError> {
    let channels = features.regressor_count();
    let mut coefficients = DMatrix::zeros(channels, features.windows.len());
    let mut fits = Vec::with_capacity(features.windows.len());

    info!(
        component = "regression",
        event = "regression.fit.start",
        unknown_meters = features.windows.len(),
        known_meters = features.known_ids.len(),
        daily_count = features.daily_count
    );

    for (index, window) in features.windows.iter().enumerate() {
        let (beta, fit) = fit_window(window, channels)?;
        debug!(
            component = "regression",
            event = "regression.fit.meter",
            meter_id = %fit.meter_id,
            usable_rows = fit.usable_rows,
            skipped_rows = fit.skipped_rows,
            rank = fit.rank
        );
        coefficients.set_column(index, &beta);
        fits.push(fit);
    }

    Ok(RegressionModel {
        daily_count: features.daily_count,
        known_ids: features.known_ids.clone(),
        unknown_ids: features
            .windows
            .iter()
            .map(|window| window.meter_id.clone())
            .collect(),
        coefficients,
        fits,
    })
}

/// Minimum-norm least-squares solution of `design * beta = target`.
///
/// Returns the solution and the numerical rank of `design`. An empty system
/// solves to the zero vector with rank 0.
pub fn solve_least_squares(
    design: DMatrix<f64>,
    target: &DVector<f64>,
) -> Result<(DVector<f64>, usize), EstimationError> {
    let cols = design.ncols();
    if design.nrows() == 0 || cols == 0 {
        return Ok((DVector::zeros(cols), 0));
    }

    let cutoff_scale = f64::EPSILON * design.nrows().max(cols) as f64;
    let svd = design.svd(true, true);
    let sigma_max = svd
        .singular_values
        .iter()
        .copied()
        .fold(0.0_f64, f64::max);
    let cutoff = cutoff_scale * sigma_max;

    let rank = svd.rank(cutoff);
    let beta = svd.solve(target, cutoff).map_err(EstimationError::Solver)?;
    Ok((beta, rank))
}

fn fit_window(
    window: &MeterTrainingWindow,
    channels: usize,
) -> Result<(DVector<f64>, MeterFit), EstimationError> {
    let mut design_values = Vec::new();
    let mut targets = Vec::new();
    for (regressors, target) in window.complete_rows() {
        design_values.extend(regressors);
        targets.push(target);
    }

    let usable_rows = targets.len();
    let design = DMatrix::from_row_slice(usable_rows, channels, &design_values);
    let (beta, rank) = solve_least_squares(design, &DVector::from_vec(targets))?;

    let fit = MeterFit {
        meter_id: window.meter_id.clone(),
        usable_rows,
        skipped_rows: window.len() - usable_rows,
        rank,
    };
    Ok((beta, fit))
}
