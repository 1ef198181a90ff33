//! Read API over published snapshots
//!
//! ```text
//! GET /api/v1.0/                     {trip_id: {stop_id: value}}
//! GET /api/v1.0/:trip_id             {stop_id: value}
//! GET /api/v1.0/:trip_id/:stop_id    value
//! GET /health                        OK
//! ```
//!
//! A value is either an arrival time rendered in service-local time
//! (`2017-03-01T08:05:00+0800`) or the failure message as a string.
//! Missing or unreadable snapshots are 404.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::warn;
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::predictor::{PredictionResult, StopPrediction};
use crate::snapshot::SnapshotStore;
use crate::types::{service_offset, StopId, TripId};

#[derive(Clone)]
pub struct AppState {
    pub snapshots: Arc<SnapshotStore>,
}

pub fn router(snapshots: Arc<SnapshotStore>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1.0/", get(all_trips_handler))
        .route("/api/v1.0/:trip_id", get(trip_handler))
        .route("/api/v1.0/:trip_id/:stop_id", get(stop_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { snapshots })
}

pub fn render_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&service_offset())
        .format("%Y-%m-%dT%H:%M:%S%z")
        .to_string()
}

pub fn render_prediction(prediction: &StopPrediction) -> Value {
    match prediction {
        StopPrediction::Arrival(time) => Value::String(render_time(*time)),
        StopPrediction::Unavailable(failure) => Value::String(failure.to_string()),
    }
}

fn render_result(result: &PredictionResult) -> Value {
    let stops: Map<String, Value> = result
        .stops()
        .iter()
        .map(|s| (s.stop_id.to_string(), render_prediction(&s.prediction)))
        .collect();
    Value::Object(stops)
}

fn load(state: &AppState, trip_id: TripId) -> Option<PredictionResult> {
    match state.snapshots.read(trip_id) {
        Ok(result) => result,
        Err(e) => {
            warn!("snapshot for trip {} unreadable: {}", trip_id, e);
            None
        }
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn all_trips_handler(State(state): State<AppState>) -> impl IntoResponse {
    let trip_ids = match state.snapshots.list() {
        Ok(ids) => ids,
        Err(e) => {
            warn!("snapshot listing failed: {}", e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let trips: Map<String, Value> = trip_ids
        .into_iter()
        .filter_map(|trip_id| load(&state, trip_id).map(|r| (trip_id.to_string(), render_result(&r))))
        .collect();
    Json(Value::Object(trips)).into_response()
}

async fn trip_handler(State(state): State<AppState>, Path(trip_id): Path<TripId>) -> impl IntoResponse {
    match load(&state, trip_id) {
        Some(result) => Json(render_result(&result)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stop_handler(
    State(state): State<AppState>,
    Path((trip_id, stop_id)): Path<(TripId, StopId)>,
) -> impl IntoResponse {
    let value = load(&state, trip_id).and_then(|r| r.get(stop_id).map(render_prediction));
    match value {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
