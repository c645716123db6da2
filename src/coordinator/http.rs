//! Admin HTTP API for the coordinator
//!
//! - `GET|POST /vol/vacuum?garbageThreshold=0.3[&volume=7]`: run a sweep
//!   (or vacuum one volume) now
//! - `GET /vol/status`: topology with writable and availability flags
//! - `POST /admin/volumes`, `DELETE /admin/volumes/:vid`: membership feed
//! - `GET /metrics`, `GET /health`

use crate::common::{parse_threshold, Error, VolumeSeed, METRICS};
use crate::coordinator::replica_set::ReplicaSet;
use crate::coordinator::topology::Topology;
use crate::coordinator::types::VolumeId;
use crate::coordinator::vacuum::VacuumCoordinator;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct CoordState {
    pub topology: Arc<Topology>,
    pub vacuum: Arc<VacuumCoordinator>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/vol/vacuum", get(vacuum).post(vacuum))
        .route("/vol/status", get(status))
        .route("/admin/volumes", post(register_volume))
        .route("/admin/volumes/:vid", delete(unregister_volume))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: &Error) -> Response {
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
struct VacuumParams {
    #[serde(rename = "garbageThreshold")]
    garbage_threshold: Option<String>,
    volume: Option<VolumeId>,
}

async fn vacuum(State(state): State<CoordState>, Query(params): Query<VacuumParams>) -> Response {
    let threshold = match params.garbage_threshold.as_deref() {
        Some(raw) => match parse_threshold(raw) {
            Ok(t) => t,
            Err(e) => return error_response(&e),
        },
        None => state.vacuum.config().garbage_threshold,
    };

    // Run detached so a client hanging up cannot cancel a pass midway
    let CoordState { topology, vacuum } = state;
    match params.volume {
        Some(vid) => {
            let pass = tokio::spawn(async move {
                vacuum.vacuum_volume_by_id(&topology, vid, threshold).await
            });
            match pass.await {
                Ok(Ok(outcome)) => Json(json!({ "volume": vid, "result": outcome })).into_response(),
                Ok(Err(e)) => error_response(&e),
                Err(e) => error_response(&Error::Internal(format!("vacuum task failed: {}", e))),
            }
        }
        None => {
            let sweep = tokio::spawn(async move {
                vacuum.sweep_with_threshold(&topology, threshold).await
            });
            match sweep.await {
                Ok(report) => Json(report).into_response(),
                Err(e) => error_response(&Error::Internal(format!("vacuum task failed: {}", e))),
            }
        }
    }
}

async fn status(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "volumes": state.topology.volume_count(),
        "layouts": state.topology.status(),
        "in_flight": state.vacuum.in_flight(),
        "last_outcomes": state.vacuum.last_outcomes(),
        "garbage_threshold": state.vacuum.config().garbage_threshold,
    }))
}

async fn register_volume(State(state): State<CoordState>, Json(seed): Json<VolumeSeed>) -> Response {
    match state.topology.register_volume(
        &seed.collection,
        seed.replication,
        seed.volume,
        ReplicaSet::new(seed.nodes),
        seed.writable,
    ) {
        Ok(layout) => (
            StatusCode::CREATED,
            Json(json!({ "volume": seed.volume, "layout": layout.name() })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn unregister_volume(State(state): State<CoordState>, Path(vid): Path<VolumeId>) -> Response {
    match state.topology.unregister_volume(vid) {
        Ok(replicas) => Json(json!({ "volume": vid, "replicas": replicas })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn metrics() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "volumes": state.topology.volume_count(),
        "vacuums_in_flight": state.vacuum.in_flight().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
