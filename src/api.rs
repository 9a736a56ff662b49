//! HTTP routes for grid configuration, history upload and voltage estimation.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::EstimationError;
use crate::estimator::{estimate_voltages, EstimateError, EstimatorConfig};
use crate::repository::{GridRepository, RepositoryError};
use crate::schemas::{
    GridData, HistoricalGridData, MessageResponse, PredictionResponse, StateEstimationData,
};

pub const WELCOME_MESSAGE: &str = "Welcome to the DdSE application..";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EstimateError> for ApiError {
    fn from(err: EstimateError) -> Self {
        match err {
            EstimateError::Estimation(inner) => Self::Estimation(inner),
            EstimateError::Repository(inner) => Self::Repository(inner),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Estimation(EstimationError::Solver(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Estimation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Repository(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            error!(
                component = "api",
                event = "http.error",
                status = status.as_u16(),
                detail = %detail
            );
        } else {
            warn!(
                component = "api",
                event = "http.rejected",
                status = status.as_u16(),
                detail = %detail
            );
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    repo: Arc<dyn GridRepository>,
    config: EstimatorConfig,
}

pub fn ddse_router(repo: Arc<dyn GridRepository>, config: EstimatorConfig) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/grid/grid", post(post_grid))
        .route("/historical/historical", post(post_historical))
        .route("/se/voltages", post(post_voltages))
        .with_state(AppState { repo, config })
}

async fn get_root() -> Json<MessageResponse> {
    Json(MessageResponse::new(WELCOME_MESSAGE))
}

async fn post_grid(
    State(state): State<AppState>,
    Json(grid): Json<GridData>,
) -> Result<Json<MessageResponse>, ApiError> {
    info!(
        component = "api",
        event = "http.grid.request",
        grid_id = %grid.grid_id,
        meters = grid.meters.len()
    );

    let repo = Arc::clone(&state.repo);
    tokio::task::spawn_blocking(move || repo.save_grid(&grid)).await??;
    Ok(Json(MessageResponse::new("Grid data saved successfully")))
}

async fn post_historical(
    State(state): State<AppState>,
    Json(data): Json<HistoricalGridData>,
) -> Result<Json<MessageResponse>, ApiError> {
    info!(
        component = "api",
        event = "http.historical.request",
        grid_id = %data.grid_id,
        entries = data.historical.len()
    );

    let repo = Arc::clone(&state.repo);
    tokio::task::spawn_blocking(move || repo.save_historical(&data)).await??;
    Ok(Json(MessageResponse::new(
        "Historical grid data saved successfully",
    )))
}

async fn post_voltages(
    State(state): State<AppState>,
    Json(request): Json<StateEstimationData>,
) -> Result<Json<PredictionResponse>, ApiError> {
    info!(
        component = "api",
        event = "http.voltages.request",
        grid_id = %request.grid_id,
        entries = request.historical.len()
    );

    let repo = Arc::clone(&state.repo);
    let config = state.config;
    let result =
        tokio::task::spawn_blocking(move || estimate_voltages(repo.as_ref(), &request, &config))
            .await??;
    Ok(Json(PredictionResponse::from(result)))
}
