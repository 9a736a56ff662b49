//! DDSE core crate: data-driven voltage state estimation.
//!
//! Current implemented scope:
//! - sampling cadence validation and meter×timestamp alignment
//! - lagged features and per-meter least-squares fitting
//! - voltage prediction for meters without a current reading
//! - SQLite persistence and the HTTP service around the estimator

mod alignment;
mod api;
mod config;
mod error;
mod estimator;
mod interval;
mod lags;
mod observability;
mod predict;
mod regression;
mod repository;
mod schemas;
mod store;

pub use alignment::{
    align_known_unknown, align_measurements, build_time_grid, build_voltage_matrix,
    organize_measurements, records_from_series, AlignedMatrices, MeasurementRecord, MeterId,
    MeterRecords, MeterSeries, TimeGrid, VoltageMatrix,
};
pub use api::{ddse_router, ApiError, WELCOME_MESSAGE};
pub use config::{ConfigError, ServerConfig, DEFAULT_ADDR, DEFAULT_DB_NAME};
pub use error::{EstimationError, IntervalIssue};
pub use estimator::{estimate_voltages, lag_instants, EstimateError, EstimatorConfig};
pub use interval::{
    check_intervals, daily_sample_count, validate_interval, MINUTES_PER_DAY,
    SUPPORTED_INTERVALS_MINUTES,
};
pub use lags::{
    build_feature_set, build_lag_tensor, regressor_names, warmup_columns, LagChannel, LagTensor,
    LaggedFeatureSet, MeterTrainingWindow, LAG_CHANNEL_COUNT, WARMUP_DAYS,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_store_opened, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use predict::{
    predict, predict_by_id, LagValues, MeterPrediction, PredictionInput, PredictionResult,
    UnavailablePolicy,
};
pub use regression::{fit, fit_feature_set, solve_least_squares, MeterFit, RegressionModel};
pub use repository::{GridRepository, InMemoryRepository, MeasurementRepository, RepositoryError};
pub use schemas::{
    GridData, HistoricalEntry, HistoricalGridData, Measurement, MessageResponse, Meter,
    PredictedVoltage, PredictionResponse, StateEstimationData, StateEstimationEntry,
    StateEstimationMeasurement,
};
pub use store::SqliteStore;
