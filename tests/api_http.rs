use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ddse::{ddse_router, EstimatorConfig, GridRepository, SqliteStore};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const DAILY: usize = 48;

fn at(step: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
        .single()
        .expect("valid base timestamp")
        + Duration::minutes(30 * step as i64)
}

fn known_voltage(t: usize) -> f64 {
    231.0 + 0.25 * (t % 12) as f64
}

fn unknown_voltages(len: usize) -> Vec<f64> {
    let mut v: Vec<f64> = Vec::with_capacity(len);
    for t in 0..len {
        let value = if t < DAILY * 7 {
            228.0 + (0.07 * t as f64).sin() + 0.5 * (0.013 * t as f64).cos()
        } else {
            0.5 * v[t - DAILY] + 0.3 * v[t - 2 * DAILY] + 0.1 * v[t - 7 * DAILY]
                + 0.4 * known_voltage(t)
        };
        v.push(value);
    }
    v
}

fn measurements(values: impl Iterator<Item = (usize, f64)>) -> Value {
    Value::Array(
        values
            .map(|(t, v)| {
                json!({
                    "timestamp": at(t).to_rfc3339(),
                    "v_measured": v,
                    "p_measured": 2.5,
                    "exogenous": 0.0
                })
            })
            .collect(),
    )
}

fn app() -> Router {
    let store: Arc<dyn GridRepository> =
        Arc::new(SqliteStore::open_in_memory().expect("in-memory store should open"));
    ddse_router(store, EstimatorConfig::default())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should be served");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let value = serde_json::from_slice(&bytes).expect("body should be json");
    (status, value)
}

fn grid_body() -> Value {
    json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "estimation_type": 1,
        "resolution": 30,
        "meters": [
            {"meter_id": "known-1", "meter_type": 1, "phase": 1, "info": 0, "active": true},
            {"meter_id": "hidden-1", "meter_type": 1, "phase": 2, "info": 0, "active": true}
        ]
    })
}

#[tokio::test]
async fn root_route_welcomes() {
    let (status, body) = send(&app(), "GET", "/", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Welcome to the DdSE application..");
}

#[tokio::test]
async fn saved_history_drives_voltage_estimate() {
    let app = app();
    let history_len = DAILY * 13;
    let target = DAILY * 13 + 5;
    let unknown = unknown_voltages(target + 1);

    let (status, body) = send(&app, "POST", "/grid/grid", Some(grid_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Grid data saved successfully");

    let historical = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [
            {
                "meter_id": "known-1",
                "info": 0,
                "measurements": measurements((0..history_len).map(|t| (t, known_voltage(t))))
            },
            {
                "meter_id": "hidden-1",
                "info": 0,
                "measurements": measurements((0..history_len).map(|t| (t, unknown[t])))
            }
        ]
    });
    let (status, body) = send(&app, "POST", "/historical/historical", Some(historical)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Historical grid data saved successfully");

    let request = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [{
            "meter_id": "known-1",
            "info": 0,
            "measurements": measurements(std::iter::once((target, known_voltage(target))))
        }]
    });
    let (status, body) = send(&app, "POST", "/se/voltages", Some(request)).await;
    assert_eq!(status, StatusCode::OK);

    let predictions = body["predictions"]
        .as_array()
        .expect("predictions array");
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0]["meter_id"], "hidden-1");
    let predicted = predictions[0]["v_predicted"]
        .as_f64()
        .expect("prediction should be available");
    assert!(
        (predicted - unknown[target]).abs() < 1e-6 * unknown[target],
        "predicted={predicted} expected={}",
        unknown[target]
    );
}

#[tokio::test]
async fn unavailable_lag_serializes_as_null_prediction() {
    let app = app();
    send(&app, "POST", "/grid/grid", Some(grid_body())).await;
    let unknown = unknown_voltages(DAILY * 10);
    let historical = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [
            {
                "meter_id": "known-1",
                "info": 0,
                "measurements": measurements((0..DAILY * 10).map(|t| (t, known_voltage(t))))
            },
            {
                "meter_id": "hidden-1",
                "info": 0,
                "measurements": measurements((0..DAILY * 10).map(|t| (t, unknown[t])))
            }
        ]
    });
    send(&app, "POST", "/historical/historical", Some(historical)).await;

    // Three days past the stored history: no one-day or two-day lag reading exists.
    let target = DAILY * 13;
    let request = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [{
            "meter_id": "known-1",
            "info": 0,
            "measurements": measurements(std::iter::once((target, known_voltage(target))))
        }]
    });
    let (status, body) = send(&app, "POST", "/se/voltages", Some(request)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predictions"][0]["meter_id"], "hidden-1");
    assert!(body["predictions"][0]["v_predicted"].is_null());
}

#[tokio::test]
async fn inconsistent_stored_cadence_returns_unprocessable() {
    let app = app();
    send(&app, "POST", "/grid/grid", Some(grid_body())).await;

    let historical = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [
            {"meter_id": "known-1", "info": 0, "measurements": measurements([(0, 230.0), (1, 230.1)].into_iter())},
            {"meter_id": "hidden-1", "info": 0, "measurements": measurements([(5, 229.0)].into_iter())}
        ]
    });
    send(&app, "POST", "/historical/historical", Some(historical)).await;

    let request = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [{
            "meter_id": "known-1",
            "info": 0,
            "measurements": measurements(std::iter::once((6, 230.2)))
        }]
    });
    let (status, body) = send(&app, "POST", "/se/voltages", Some(request)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"]
        .as_str()
        .expect("detail string")
        .contains("inconsistent sampling interval"));
}

#[tokio::test]
async fn request_without_unknown_meters_returns_empty_predictions() {
    let app = app();
    send(&app, "POST", "/grid/grid", Some(grid_body())).await;

    let request = json!({
        "grid_id": "lv-12",
        "p_units": "kW",
        "v_units": "V",
        "historical": [
            {"meter_id": "known-1", "info": 0, "measurements": measurements(std::iter::once((0, 230.0)))},
            {"meter_id": "hidden-1", "info": 0, "measurements": measurements(std::iter::once((0, 229.0)))}
        ]
    });
    let (status, body) = send(&app, "POST", "/se/voltages", Some(request)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"predictions": []}));
}
