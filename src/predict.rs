//! Linear voltage prediction for unknown meters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alignment::MeterId;
use crate::error::EstimationError;
use crate::lags::LAG_CHANNEL_COUNT;
use crate::regression::RegressionModel;

/// Lag values of one unknown meter, ordered `[1d, 2d, 7d]`.
pub type LagValues = [Option<f64>; LAG_CHANNEL_COUNT];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailablePolicy {
    /// An unavailable regressor makes that meter's prediction unavailable.
    #[default]
    Propagate,
    /// An unavailable regressor fails the whole prediction.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub lag_values: Vec<LagValues>,
    pub known_current: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterPrediction {
    pub meter_id: MeterId,
    pub voltage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predictions: Vec<MeterPrediction>,
}

impl PredictionResult {
    pub fn get(&self, meter_id: &str) -> Option<f64> {
        self.predictions
            .iter()
            .find(|prediction| prediction.meter_id == meter_id)
            .and_then(|prediction| prediction.voltage)
    }

    pub fn to_map(&self) -> BTreeMap<MeterId, Option<f64>> {
        self.predictions
            .iter()
            .map(|prediction| (prediction.meter_id.clone(), prediction.voltage))
            .collect()
    }

    pub fn unavailable_count(&self) -> usize {
        self.predictions
            .iter()
            .filter(|prediction| prediction.voltage.is_none())
            .count()
    }
}

/// Applies `model` to one observation per unknown meter.
///
/// `lag_values_per_meter` follows the model's unknown-meter order and
/// `known_current` its known-meter order. Positions are not reconciled by id.
pub fn predict(
    model: &RegressionModel,
    lag_values_per_meter: &[LagValues],
    known_current: &[Option<f64>],
    policy: UnavailablePolicy,
) -> Result<PredictionResult, EstimationError> {
    let unknown_ids = model.unknown_ids();
    if lag_values_per_meter.len() != unknown_ids.len() {
        return Err(EstimationError::DimensionMismatch {
            what: "lag value triples",
            expected: unknown_ids.len(),
            found: lag_values_per_meter.len(),
        });
    }
    if known_current.len() != model.known_ids().len() {
        return Err(EstimationError::DimensionMismatch {
            what: "known meter voltages",
            expected: model.known_ids().len(),
            found: known_current.len(),
        });
    }

    let mut predictions = Vec::with_capacity(unknown_ids.len());
    for (index, (meter_id, lags)) in unknown_ids.iter().zip(lag_values_per_meter).enumerate() {
        let voltage = if model.is_untrained(index) {
            if policy == UnavailablePolicy::Strict {
                return Err(EstimationError::InsufficientData {
                    what: "complete training rows",
                    required: 1,
                    found: 0,
                });
            }
            warn!(
                component = "predict",
                event = "predict.untrained",
                meter_id = %meter_id
            );
            None
        } else {
            let regressors: Vec<Option<f64>> = lags.iter().chain(known_current).copied().collect();
            match complete_values(&regressors) {
                Ok(values) => Some(
                    values
                        .iter()
                        .zip(model.column(index).iter())
                        .map(|(value, coefficient)| value * coefficient)
                        .sum::<f64>(),
                ),
                Err(position) => {
                    let channel = channel_label(model, position);
                    if policy == UnavailablePolicy::Strict {
                        return Err(EstimationError::UnavailableRegressor {
                            meter_id: meter_id.clone(),
                            channel,
                        });
                    }
                    warn!(
                        component = "predict",
                        event = "predict.regressor_unavailable",
                        meter_id = %meter_id,
                        channel = %channel
                    );
                    None
                }
            }
        };

        debug!(
            component = "predict",
            event = "predict.meter",
            meter_id = %meter_id,
            voltage = ?voltage
        );
        predictions.push(MeterPrediction {
            meter_id: meter_id.clone(),
            voltage,
        });
    }

    Ok(PredictionResult { predictions })
}

/// Same as [`predict`], with inputs keyed by meter id and laid out in model order.
pub fn predict_by_id(
    model: &RegressionModel,
    lag_values: &BTreeMap<MeterId, LagValues>,
    known_current: &BTreeMap<MeterId, f64>,
    policy: UnavailablePolicy,
) -> Result<PredictionResult, EstimationError> {
    let ordered_lags: Vec<LagValues> = model
        .unknown_ids()
        .iter()
        .map(|id| lag_values.get(id).copied().unwrap_or([None; LAG_CHANNEL_COUNT]))
        .collect();
    let ordered_known: Vec<Option<f64>> = model
        .known_ids()
        .iter()
        .map(|id| known_current.get(id).copied())
        .collect();

    predict(model, &ordered_lags, &ordered_known, policy)
}

/// All regressor values, or the position of the first unavailable one.
fn complete_values(regressors: &[Option<f64>]) -> Result<Vec<f64>, usize> {
    regressors
        .iter()
        .enumerate()
        .map(|(position, value)| value.filter(|v| v.is_finite()).ok_or(position))
        .collect()
}

fn channel_label(model: &RegressionModel, position: usize) -> String {
    model
        .channel_names()
        .into_iter()
        .nth(position)
        .unwrap_or_default()
}
