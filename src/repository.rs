//! Persistence seam between the estimator and its measurement store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::alignment::{MeasurementRecord, MeterId};
use crate::schemas::{GridData, HistoricalGridData, Measurement};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store path error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored timestamp {0} ms is out of range")]
    InvalidTimestamp(i64),
}

/// Read access the estimator needs.
pub trait MeasurementRepository: Send + Sync + 'static {
    fn list_grid_meter_ids(&self, grid_id: &str) -> Result<BTreeSet<MeterId>, RepositoryError>;

    fn fetch_measurements(
        &self,
        meter_ids: &[MeterId],
    ) -> Result<Vec<MeasurementRecord>, RepositoryError>;

    /// Voltages at exact instants, indexed `[timestamp][meter]` in argument order.
    fn fetch_measurements_at(
        &self,
        meter_ids: &[MeterId],
        timestamps: &[DateTime<Utc>],
    ) -> Result<Vec<Vec<Option<f64>>>, RepositoryError>;
}

/// Write side used by the HTTP layer.
pub trait GridRepository: MeasurementRepository {
    /// Upserts the grid row and replaces its meter list.
    fn save_grid(&self, grid: &GridData) -> Result<(), RepositoryError>;

    fn save_historical(&self, data: &HistoricalGridData) -> Result<(), RepositoryError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    grids: BTreeMap<String, GridData>,
    measurements: BTreeMap<MeterId, BTreeMap<DateTime<Utc>, Measurement>>,
}

/// Repository backed by process memory, used by tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    inner: Arc<RwLock<InMemoryState>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurement_count(&self) -> usize {
        self.inner
            .read()
            .expect("in-memory repository lock should not be poisoned")
            .measurements
            .values()
            .map(BTreeMap::len)
            .sum()
    }
}

impl MeasurementRepository for InMemoryRepository {
    fn list_grid_meter_ids(&self, grid_id: &str) -> Result<BTreeSet<MeterId>, RepositoryError> {
        let state = self
            .inner
            .read()
            .expect("in-memory repository lock should not be poisoned");
        Ok(state
            .grids
            .get(grid_id)
            .map(|grid| {
                grid.meters
                    .iter()
                    .map(|meter| meter.meter_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_measurements(
        &self,
        meter_ids: &[MeterId],
    ) -> Result<Vec<MeasurementRecord>, RepositoryError> {
        let state = self
            .inner
            .read()
            .expect("in-memory repository lock should not be poisoned");
        let wanted: BTreeSet<&MeterId> = meter_ids.iter().collect();

        Ok(wanted
            .into_iter()
            .filter_map(|id| state.measurements.get(id).map(|readings| (id, readings)))
            .flat_map(|(id, readings)| {
                readings.values().map(move |measurement| MeasurementRecord {
                    meter_id: id.clone(),
                    timestamp: measurement.timestamp,
                    voltage: measurement.v_measured,
                })
            })
            .collect())
    }

    fn fetch_measurements_at(
        &self,
        meter_ids: &[MeterId],
        timestamps: &[DateTime<Utc>],
    ) -> Result<Vec<Vec<Option<f64>>>, RepositoryError> {
        let state = self
            .inner
            .read()
            .expect("in-memory repository lock should not be poisoned");

        Ok(timestamps
            .iter()
            .map(|ts| {
                meter_ids
                    .iter()
                    .map(|id| {
                        state
                            .measurements
                            .get(id)
                            .and_then(|readings| readings.get(ts))
                            .map(|measurement| measurement.v_measured)
                    })
                    .collect()
            })
            .collect())
    }
}

impl GridRepository for InMemoryRepository {
    fn save_grid(&self, grid: &GridData) -> Result<(), RepositoryError> {
        let mut state = self
            .inner
            .write()
            .expect("in-memory repository lock should not be poisoned");
        state.grids.insert(grid.grid_id.clone(), grid.clone());
        Ok(())
    }

    fn save_historical(&self, data: &HistoricalGridData) -> Result<(), RepositoryError> {
        let mut state = self
            .inner
            .write()
            .expect("in-memory repository lock should not be poisoned");
        for entry in &data.historical {
            let readings = state.measurements.entry(entry.meter_id.clone()).or_default();
            for measurement in &entry.measurements {
                readings.insert(measurement.timestamp, measurement.clone());
            }
        }
        Ok(())
    }
}
