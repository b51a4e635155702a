//! HTTP surface of the daemon.
//!
//! `POST /extract_vector_batch` scores a burst of frames and always answers
//! with a [`ResultRecord`]; errors map to `success: false` plus a status
//! code. `GET /status` reports version and active thresholds.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use liveframe_core::{LivenessThresholds, ResultRecord, SpoofPolicy, SpoofThresholds};
use serde::Deserialize;
use tracing::Instrument;

use crate::engine::{EngineError, EngineHandle};

/// Shared state accessible by route handlers.
pub struct AppState {
    pub engine: EngineHandle,
    pub max_frames: usize,
    pub reply_timeout: Option<Duration>,
    pub spoof_policy: SpoofPolicy,
    pub spoof: SpoofThresholds,
    pub liveness: LivenessThresholds,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub images: Vec<String>,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/extract_vector_batch", post(extract_vector_batch))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

type Reply = (StatusCode, Json<ResultRecord>);

fn failure(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(ResultRecord::failure(message)))
}

async fn extract_vector_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Reply {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("batch", %request_id);
    score_request(state, payload).instrument(span).await
}

async fn score_request(
    state: Arc<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Reply {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "rejecting malformed request");
            return failure(
                rejection.status(),
                format!("Invalid request: {}", rejection.body_text()),
            );
        }
    };

    let frames = request.images.len();
    tracing::info!(frames, "batch received");
    if frames > state.max_frames {
        tracing::warn!(frames, max = state.max_frames, "rejecting oversized batch");
        return failure(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Too many frames: {frames} (max {})", state.max_frames),
        );
    }

    match state.engine.score(request.images, state.reply_timeout).await {
        Ok(report) => (StatusCode::OK, Json(report.record)),
        Err(EngineError::Timeout(limit)) => {
            tracing::error!(timeout = ?limit, "scoring timed out");
            failure(StatusCode::GATEWAY_TIMEOUT, "Scoring timed out")
        }
        Err(e) => {
            tracing::error!(error = %e, "scoring failed");
            failure(StatusCode::SERVICE_UNAVAILABLE, "Scoring engine unavailable")
        }
    }
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workers": state.engine.workers(),
        "max_frames": state.max_frames,
        "spoof_policy": state.spoof_policy,
        "spoof": state.spoof,
        "liveness": state.liveness,
    }))
}
