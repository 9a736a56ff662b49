//! Request and response payloads of the HTTP API.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alignment::MeterId;
use crate::predict::PredictionResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub meter_id: MeterId,
    pub meter_type: i64,
    pub phase: i64,
    pub info: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridData {
    pub grid_id: String,
    pub p_units: String,
    pub v_units: String,
    pub estimation_type: i64,
    /// Sampling resolution in minutes.
    pub resolution: i64,
    pub meters: Vec<Meter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub v_measured: f64,
    pub p_measured: f64,
    pub exogenous: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub meter_id: MeterId,
    pub info: i64,
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalGridData {
    pub grid_id: String,
    pub p_units: String,
    pub v_units: String,
    pub historical: Vec<HistoricalEntry>,
}

pub type StateEstimationMeasurement = Measurement;
pub type StateEstimationEntry = HistoricalEntry;

/// Current readings of the meters that report; every other grid meter is estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEstimationData {
    pub grid_id: String,
    pub p_units: String,
    pub v_units: String,
    pub historical: Vec<StateEstimationEntry>,
}

impl StateEstimationData {
    /// Distinct meter ids present in the request.
    pub fn meter_ids(&self) -> BTreeSet<MeterId> {
        self.historical
            .iter()
            .map(|entry| entry.meter_id.clone())
            .collect()
    }

    pub fn reference_timestamp(&self) -> Option<DateTime<Utc>> {
        self.historical
            .first()
            .and_then(|entry| entry.measurements.first())
            .map(|measurement| measurement.timestamp)
    }

    /// Voltage reported by `meter_id` at exactly `timestamp`.
    pub fn voltage_at(&self, meter_id: &str, timestamp: DateTime<Utc>) -> Option<f64> {
        self.historical
            .iter()
            .filter(|entry| entry.meter_id == meter_id)
            .flat_map(|entry| entry.measurements.iter())
            .find(|measurement| measurement.timestamp == timestamp)
            .map(|measurement| measurement.v_measured)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedVoltage {
    pub meter_id: MeterId,
    pub v_predicted: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Vec<PredictedVoltage>,
}

impl From<PredictionResult> for PredictionResponse {
    fn from(result: PredictionResult) -> Self {
        Self {
            predictions: result
                .predictions
                .into_iter()
                .map(|prediction| PredictedVoltage {
                    meter_id: prediction.meter_id,
                    v_predicted: prediction.voltage,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_estimation_payload_parses_rfc3339_with_offsets() {
        let raw = r#"{
            "grid_id": "g1",
            "p_units": "kW",
            "v_units": "V",
            "historical": [
                {"meter_id": "m1", "info": 0, "measurements": [
                    {"timestamp": "2025-01-08T01:00:00+01:00", "v_measured": 230.1, "p_measured": 1.0, "exogenous": 0.0}
                ]}
            ]
        }"#;

        let data: StateEstimationData = serde_json::from_str(raw).expect("payload parses");
        let reference = data.reference_timestamp().expect("reference instant");

        assert_eq!(reference.to_rfc3339(), "2025-01-08T00:00:00+00:00");
        assert_eq!(data.voltage_at("m1", reference), Some(230.1));
        assert_eq!(data.voltage_at("m2", reference), None);
    }

    #[test]
    fn unavailable_prediction_serializes_as_null() {
        let response = PredictionResponse {
            predictions: vec![PredictedVoltage {
                meter_id: "m9".to_string(),
                v_predicted: None,
            }],
        };

        let json = serde_json::to_value(&response).expect("serializes");
        assert!(json["predictions"][0]["v_predicted"].is_null());
    }
}
