//! Sparse per-meter readings to dense meter×timestamp matrices.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EstimationError;

pub type MeterId = String;

/// One stored voltage reading, as handed over by a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub meter_id: MeterId,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSeries {
    pub meter_id: MeterId,
    pub readings: Vec<(DateTime<Utc>, f64)>,
}

/// Readings grouped by meter, each meter's readings keyed by timestamp.
pub type MeterRecords = BTreeMap<MeterId, BTreeMap<DateTime<Utc>, f64>>;

/// Sorted, distinct timestamps addressed by column index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeGrid {
    timestamps: Vec<DateTime<Utc>>,
    index: HashMap<DateTime<Utc>, usize>,
}

impl TimeGrid {
    pub fn new(timestamps: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let sorted: BTreeSet<DateTime<Utc>> = timestamps.into_iter().collect();
        let timestamps: Vec<DateTime<Utc>> = sorted.into_iter().collect();
        let index = timestamps
            .iter()
            .enumerate()
            .map(|(column, ts)| (*ts, column))
            .collect();
        Self { timestamps, index }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column_of(&self, ts: &DateTime<Utc>) -> Option<usize> {
        self.index.get(ts).copied()
    }
}

/// Dense row-major matrix of voltages; `None` marks an unavailable cell.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageMatrix {
    meter_ids: Vec<MeterId>,
    cols: usize,
    cells: Vec<Option<f64>>,
}

impl VoltageMatrix {
    pub fn from_rows(
        meter_ids: Vec<MeterId>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, EstimationError> {
        if meter_ids.len() != rows.len() {
            return Err(EstimationError::DimensionMismatch {
                what: "voltage matrix rows",
                expected: meter_ids.len(),
                found: rows.len(),
            });
        }

        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut cells = Vec::with_capacity(cols * rows.len());
        for row in rows {
            if row.len() != cols {
                return Err(EstimationError::DimensionMismatch {
                    what: "voltage matrix columns",
                    expected: cols,
                    found: row.len(),
                });
            }
            cells.extend(row.into_iter().map(|cell| cell.filter(|v| v.is_finite())));
        }

        Ok(Self {
            meter_ids,
            cols,
            cells,
        })
    }

    pub fn meter_ids(&self) -> &[MeterId] {
        &self.meter_ids
    }

    pub fn rows(&self) -> usize {
        self.meter_ids.len()
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, row: usize) -> &[Option<f64>] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows() || col >= self.cols {
            return None;
        }
        self.cells[row * self.cols + col]
    }

    pub fn available_cells(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }
}

/// Known and unknown matrices built over one shared grid.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMatrices {
    pub grid: TimeGrid,
    pub known: VoltageMatrix,
    pub unknown: VoltageMatrix,
}

/// Groups flat records by meter. A repeated (meter, timestamp) keeps the last value.
pub fn organize_measurements(records: &[MeasurementRecord]) -> MeterRecords {
    let mut out = MeterRecords::new();
    for record in records {
        out.entry(record.meter_id.clone())
            .or_default()
            .insert(record.timestamp, record.voltage);
    }
    out
}

pub fn records_from_series(series: &[MeterSeries]) -> MeterRecords {
    let mut out = MeterRecords::new();
    for entry in series {
        let readings = out.entry(entry.meter_id.clone()).or_default();
        for (ts, voltage) in &entry.readings {
            readings.insert(*ts, *voltage);
        }
    }
    out
}

/// Sorted union of the timestamps seen across `meter_ids`.
pub fn build_time_grid(records: &MeterRecords, meter_ids: &[MeterId]) -> TimeGrid {
    TimeGrid::new(
        meter_ids
            .iter()
            .filter_map(|id| records.get(id))
            .flat_map(|readings| readings.keys().copied()),
    )
}

/// Lays `meter_ids` out as rows over `grid`, in exactly the given order.
pub fn build_voltage_matrix(
    meter_ids: &[MeterId],
    records: &MeterRecords,
    grid: &TimeGrid,
) -> VoltageMatrix {
    let cols = grid.len();
    let mut cells = vec![None; meter_ids.len() * cols];

    for (row, meter_id) in meter_ids.iter().enumerate() {
        let Some(readings) = records.get(meter_id) else {
            continue;
        };
        for (ts, voltage) in readings {
            if !voltage.is_finite() {
                continue;
            }
            if let Some(col) = grid.column_of(ts) {
                cells[row * cols + col] = Some(*voltage);
            }
        }
    }

    VoltageMatrix {
        meter_ids: meter_ids.to_vec(),
        cols,
        cells,
    }
}

/// Aligns the given meters into a dense matrix over their own timestamp union.
pub fn align_measurements(
    records: &MeterRecords,
    meter_ids: &[MeterId],
) -> (VoltageMatrix, TimeGrid) {
    let grid = build_time_grid(records, meter_ids);
    let matrix = build_voltage_matrix(meter_ids, records, &grid);
    (matrix, grid)
}

pub fn align_known_unknown(
    records: &MeterRecords,
    known_ids: &[MeterId],
    unknown_ids: &[MeterId],
) -> AlignedMatrices {
    let all_ids: Vec<MeterId> = known_ids.iter().chain(unknown_ids).cloned().collect();
    let grid = build_time_grid(records, &all_ids);
    let known = build_voltage_matrix(known_ids, records, &grid);
    let unknown = build_voltage_matrix(unknown_ids, records, &grid);
    AlignedMatrices {
        grid,
        known,
        unknown,
    }
}
