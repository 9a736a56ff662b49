//! SQLite-backed grid and measurement store.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use crate::alignment::{MeasurementRecord, MeterId};
use crate::repository::{GridRepository, MeasurementRepository, RepositoryError};
use crate::schemas::{GridData, HistoricalGridData};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RepositoryError> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("sqlite connection lock should not be poisoned")
    }

    pub fn measurement_count(&self) -> Result<u64, RepositoryError> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl MeasurementRepository for SqliteStore {
    fn list_grid_meter_ids(&self, grid_id: &str) -> Result<BTreeSet<MeterId>, RepositoryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT meter_id FROM meters WHERE grid_id = ?1")?;
        let ids = stmt
            .query_map(params![grid_id], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    fn fetch_measurements(
        &self,
        meter_ids: &[MeterId],
    ) -> Result<Vec<MeasurementRecord>, RepositoryError> {
        if meter_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let sql = format!(
            "
            SELECT meter_id, ts_ms_utc, v_measured
            FROM measurements
            WHERE meter_id IN ({})
            ORDER BY meter_id, ts_ms_utc
            ",
            placeholders(meter_ids.len(), 1)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(meter_ids.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let records = rows
            .into_iter()
            .map(|(meter_id, ts_ms, voltage)| {
                Ok(MeasurementRecord {
                    meter_id,
                    timestamp: timestamp_from_ms(ts_ms)?,
                    voltage,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        debug!(
            component = "store",
            event = "store.fetch_measurements",
            meters = meter_ids.len(),
            rows = records.len()
        );
        Ok(records)
    }

    fn fetch_measurements_at(
        &self,
        meter_ids: &[MeterId],
        timestamps: &[DateTime<Utc>],
    ) -> Result<Vec<Vec<Option<f64>>>, RepositoryError> {
        if meter_ids.is_empty() {
            return Ok(vec![Vec::new(); timestamps.len()]);
        }

        let conn = self.lock();
        let sql = format!(
            "
            SELECT meter_id, v_measured
            FROM measurements
            WHERE ts_ms_utc = ?1
              AND meter_id IN ({})
            ",
            placeholders(meter_ids.len(), 2)
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut out = Vec::with_capacity(timestamps.len());
        for ts in timestamps {
            let mut args: Vec<rusqlite::types::Value> = Vec::with_capacity(meter_ids.len() + 1);
            args.push(ts.timestamp_millis().into());
            args.extend(meter_ids.iter().map(|id| id.clone().into()));

            let found: HashMap<String, f64> = stmt
                .query_map(params_from_iter(args), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<Result<_, _>>()?;

            out.push(meter_ids.iter().map(|id| found.get(id).copied()).collect());
        }

        Ok(out)
    }
}

impl GridRepository for SqliteStore {
    fn save_grid(&self, grid: &GridData) -> Result<(), RepositoryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "
            INSERT INTO grids (grid_id, p_units, v_units, estimation_type, resolution)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(grid_id) DO UPDATE SET
                p_units = excluded.p_units,
                v_units = excluded.v_units,
                estimation_type = excluded.estimation_type,
                resolution = excluded.resolution
            ",
            params![
                grid.grid_id,
                grid.p_units,
                grid.v_units,
                grid.estimation_type,
                grid.resolution,
            ],
        )?;
        tx.execute(
            "DELETE FROM meters WHERE grid_id = ?1",
            params![grid.grid_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO meters (meter_id, meter_type, phase, info, active, grid_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(meter_id, grid_id) DO UPDATE SET
                    meter_type = excluded.meter_type,
                    phase = excluded.phase,
                    info = excluded.info,
                    active = excluded.active
                ",
            )?;
            for meter in &grid.meters {
                stmt.execute(params![
                    meter.meter_id,
                    meter.meter_type,
                    meter.phase,
                    meter.info,
                    meter.active,
                    grid.grid_id,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            component = "store",
            event = "store.save_grid",
            grid_id = %grid.grid_id,
            meters = grid.meters.len()
        );
        Ok(())
    }

    fn save_historical(&self, data: &HistoricalGridData) -> Result<(), RepositoryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut rows = 0usize;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO measurements (meter_id, ts_ms_utc, v_measured, p_measured, exogenous)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(meter_id, ts_ms_utc) DO UPDATE SET
                    v_measured = excluded.v_measured,
                    p_measured = excluded.p_measured,
                    exogenous = excluded.exogenous
                ",
            )?;
            for entry in &data.historical {
                for measurement in &entry.measurements {
                    stmt.execute(params![
                        entry.meter_id,
                        measurement.timestamp.timestamp_millis(),
                        measurement.v_measured,
                        measurement.p_measured,
                        measurement.exogenous,
                    ])?;
                    rows += 1;
                }
            }
        }
        tx.commit()?;

        debug!(
            component = "store",
            event = "store.save_historical",
            grid_id = %data.grid_id,
            rows
        );
        Ok(())
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), RepositoryError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS grids (
            grid_id TEXT PRIMARY KEY,
            p_units TEXT NOT NULL,
            v_units TEXT NOT NULL,
            estimation_type INTEGER NOT NULL,
            resolution INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meters (
            meter_id TEXT NOT NULL,
            meter_type INTEGER NOT NULL,
            phase INTEGER NOT NULL,
            info INTEGER NOT NULL,
            active INTEGER NOT NULL,
            grid_id TEXT NOT NULL REFERENCES grids(grid_id),
            PRIMARY KEY (meter_id, grid_id)
        );

        CREATE TABLE IF NOT EXISTS measurements (
            meter_id TEXT NOT NULL,
            ts_ms_utc INTEGER NOT NULL,
            v_measured REAL NOT NULL,
            p_measured REAL NOT NULL,
            exogenous REAL NOT NULL,
            PRIMARY KEY (meter_id, ts_ms_utc)
        ) WITHOUT ROWID;
        ",
    )?;
    Ok(())
}

/// `?first, ?first+1, ...` for `count` bound parameters.
fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn timestamp_from_ms(ts_ms: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(ts_ms).ok_or(RepositoryError::InvalidTimestamp(ts_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_from_offset() {
        assert_eq!(placeholders(3, 1), "?1, ?2, ?3");
        assert_eq!(placeholders(2, 2), "?2, ?3");
        assert_eq!(placeholders(0, 1), "");
    }

    #[test]
    fn out_of_range_millis_are_rejected() {
        assert!(timestamp_from_ms(0).is_ok());
        assert!(matches!(
            timestamp_from_ms(i64::MAX),
            Err(RepositoryError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn empty_meter_list_short_circuits() {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        assert!(store.fetch_measurements(&[]).expect("fetch").is_empty());

        let now = Utc::now();
        let values = store
            .fetch_measurements_at(&[], &[now, now])
            .expect("point lookup");
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(Vec::is_empty));
    }
}
