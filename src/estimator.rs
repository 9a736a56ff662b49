//! Request-level estimation: repository reads, fit, and prediction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::alignment::{align_known_unknown, organize_measurements, MeterId};
use crate::error::EstimationError;
use crate::interval::validate_interval;
use crate::lags::{LagChannel, LAG_CHANNEL_COUNT};
use crate::predict::{predict, LagValues, PredictionInput, PredictionResult, UnavailablePolicy};
use crate::regression::fit;
use crate::repository::{MeasurementRepository, RepositoryError};
use crate::schemas::StateEstimationData;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub unavailable_policy: UnavailablePolicy,
}

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Instants one, two and seven days before `reference`, in lag-channel order.
pub fn lag_instants(reference: DateTime<Utc>) -> [DateTime<Utc>; LAG_CHANNEL_COUNT] {
    LagChannel::ALL.map(|channel| reference - Duration::days(channel.days() as i64))
}

/// Estimates the current voltage of every grid meter missing from `request`.
///
/// Meters in the request that the grid does not list are ignored. The model is
/// refitted from the full stored history on every call.
pub fn estimate_voltages<R>(
    repo: &R,
    request: &StateEstimationData,
    config: &EstimatorConfig,
) -> Result<PredictionResult, EstimateError>
where
    R: MeasurementRepository + ?Sized,
{
    let input_ids = request.meter_ids();
    if input_ids.is_empty() {
        info!(
            component = "estimator",
            event = "estimate.skipped",
            grid_id = %request.grid_id,
            reason = "no_input_meters"
        );
        return Ok(PredictionResult::default());
    }

    let grid_ids = repo.list_grid_meter_ids(&request.grid_id)?;
    let known_ids: Vec<MeterId> = grid_ids.intersection(&input_ids).cloned().collect();
    let unknown_ids: Vec<MeterId> = grid_ids.difference(&input_ids).cloned().collect();
    if unknown_ids.is_empty() {
        info!(
            component = "estimator",
            event = "estimate.skipped",
            grid_id = %request.grid_id,
            reason = "no_unknown_meters"
        );
        return Ok(PredictionResult::default());
    }

    info!(
        component = "estimator",
        event = "estimate.start",
        grid_id = %request.grid_id,
        known_meters = known_ids.len(),
        unknown_meters = unknown_ids.len()
    );

    let all_ids: Vec<MeterId> = grid_ids.into_iter().collect();
    let records = organize_measurements(&repo.fetch_measurements(&all_ids)?);
    let aligned = align_known_unknown(&records, &known_ids, &unknown_ids);
    let daily_count = validate_interval(aligned.grid.timestamps())?;
    let model = fit(&aligned.known, &aligned.unknown, daily_count)?;

    debug!(
        component = "estimator",
        event = "estimate.fit.finish",
        grid_id = %request.grid_id,
        columns = aligned.grid.len(),
        daily_count
    );

    let reference =
        request
            .reference_timestamp()
            .ok_or(EstimationError::InsufficientData {
                what: "request measurements",
                required: 1,
                found: 0,
            })?;
    let input = PredictionInput {
        lag_values: lag_values_for(repo, model.unknown_ids(), reference)?,
        known_current: model
            .known_ids()
            .iter()
            .map(|id| request.voltage_at(id, reference))
            .collect(),
    };

    let result = predict(
        &model,
        &input.lag_values,
        &input.known_current,
        config.unavailable_policy,
    )?;

    info!(
        component = "estimator",
        event = "estimate.finish",
        grid_id = %request.grid_id,
        reference = %reference.to_rfc3339(),
        predictions = result.predictions.len(),
        unavailable = result.unavailable_count()
    );
    Ok(result)
}

fn lag_values_for<R>(
    repo: &R,
    unknown_ids: &[MeterId],
    reference: DateTime<Utc>,
) -> Result<Vec<LagValues>, RepositoryError>
where
    R: MeasurementRepository + ?Sized,
{
    let by_instant = repo.fetch_measurements_at(unknown_ids, &lag_instants(reference))?;

    Ok((0..unknown_ids.len())
        .map(|meter| {
            let mut lags: LagValues = [None; LAG_CHANNEL_COUNT];
            for (channel, values) in by_instant.iter().enumerate().take(LAG_CHANNEL_COUNT) {
                lags[channel] = values.get(meter).copied().flatten();
            }
            lags
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{GridRepository, InMemoryRepository};
    use crate::schemas::{GridData, HistoricalEntry, Measurement, Meter};
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .expect("valid base timestamp")
    }

    fn grid(ids: &[&str]) -> GridData {
        GridData {
            grid_id: "g".to_string(),
            p_units: "kW".to_string(),
            v_units: "V".to_string(),
            estimation_type: 0,
            resolution: 30,
            meters: ids
                .iter()
                .map(|id| Meter {
                    meter_id: id.to_string(),
                    meter_type: 0,
                    phase: 1,
                    info: 0,
                    active: true,
                })
                .collect(),
        }
    }

    fn request(entries: &[(&str, DateTime<Utc>, f64)]) -> StateEstimationData {
        StateEstimationData {
            grid_id: "g".to_string(),
            p_units: "kW".to_string(),
            v_units: "V".to_string(),
            historical: entries
                .iter()
                .map(|(id, ts, v)| HistoricalEntry {
                    meter_id: id.to_string(),
                    info: 0,
                    measurements: vec![Measurement {
                        timestamp: *ts,
                        v_measured: *v,
                        p_measured: 0.0,
                        exogenous: 0.0,
                    }],
                })
                .collect(),
        }
    }

    #[test]
    fn lag_instants_step_back_whole_days() {
        let reference = base() + Duration::days(10);
        let [one, two, seven] = lag_instants(reference);
        assert_eq!(one, base() + Duration::days(9));
        assert_eq!(two, base() + Duration::days(8));
        assert_eq!(seven, base() + Duration::days(3));
    }

    #[test]
    fn empty_request_or_fully_observed_grid_yields_no_predictions() {
        let repo = InMemoryRepository::new();
        repo.save_grid(&grid(&["a", "b"])).expect("save grid");
        let config = EstimatorConfig::default();

        let empty = estimate_voltages(&repo, &request(&[]), &config).expect("empty request");
        assert!(empty.predictions.is_empty());

        let full = estimate_voltages(
            &repo,
            &request(&[("a", base(), 230.0), ("b", base(), 231.0)]),
            &config,
        )
        .expect("fully observed grid");
        assert!(full.predictions.is_empty());
    }

    #[test]
    fn missing_history_surfaces_as_insufficient_data() {
        let repo = InMemoryRepository::new();
        repo.save_grid(&grid(&["a", "b"])).expect("save grid");

        let err = estimate_voltages(
            &repo,
            &request(&[("a", base(), 230.0)]),
            &EstimatorConfig::default(),
        )
        .expect_err("no stored history");
        assert!(matches!(
            err,
            EstimateError::Estimation(EstimationError::InsufficientData { .. })
        ));
    }
}
