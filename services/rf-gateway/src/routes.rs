//! REST control routes

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rf_capture::device::FieldChange;
use rf_capture::{
    BurstRecord, CaptureError, ControlError, DeviceConfig, DeviceInfo, DeviceSummary, FftFrame, TuneReport,
    TuneRequest, WaterfallRow,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::AppState;

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Control(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Control(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Control(ControlError::Failed(CaptureError::Configuration { .. })) => StatusCode::BAD_REQUEST,
            ApiError::Control(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_devices(State(state): State<Arc<AppState>>) -> ApiResult<Vec<DeviceSummary>> {
    Ok(Json(state.service.list_devices().await?))
}

#[derive(Debug, Deserialize)]
pub struct AllParams {
    cached: Option<bool>,
}

pub async fn all_devices(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AllParams>,
) -> ApiResult<Vec<DeviceInfo>> {
    let cached = params.cached.unwrap_or(false);
    Ok(Json(state.service.get_all_device_info(cached).await?))
}

pub async fn rescan(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let devices = state.service.rescan().await?;
    info!("Rescan found {} device(s)", devices.len());
    Ok(Json(json!({ "devices": devices })))
}

pub async fn device_info(State(state): State<Arc<AppState>>, Path(index): Path<u32>) -> ApiResult<DeviceInfo> {
    Ok(Json(state.service.get_device_info(index).await?))
}

/// Start scanning; the body is optional and defaults to the standard config
pub async fn start_scan(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
    config: Option<Json<DeviceConfig>>,
) -> ApiResult<Value> {
    let config = config.map(|Json(c)| c).unwrap_or_default();
    state.service.start_scan(index, config).await?;
    Ok(Json(json!({ "status": "scanning", "device_index": index })))
}

pub async fn stop_scan(State(state): State<Arc<AppState>>, Path(index): Path<u32>) -> ApiResult<Value> {
    state.service.stop_scan(index).await?;
    Ok(Json(json!({ "status": "stopped", "device_index": index })))
}

/// Tune result as sent to clients: per-field outcomes plus a one-line summary
#[derive(Debug, Serialize)]
pub struct TuneResponse {
    pub changes: Vec<FieldChange>,
    pub summary: String,
}

impl From<TuneReport> for TuneResponse {
    fn from(report: TuneReport) -> Self {
        let summary = report.summary();
        Self {
            changes: report.changes,
            summary,
        }
    }
}

pub async fn tune(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
    Json(request): Json<TuneRequest>,
) -> ApiResult<TuneResponse> {
    if request.is_empty() {
        return Err(ApiError::BadRequest("no tuning fields supplied".to_string()));
    }
    let report = state.service.tune(index, request).await?;
    Ok(Json(report.into()))
}

#[derive(Debug, Deserialize)]
pub struct FftParams {
    points: Option<usize>,
}

/// Latest frame, decimated to `points` (default: the streaming limit)
pub async fn latest_fft(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
    Query(params): Query<FftParams>,
) -> ApiResult<FftFrame> {
    let points = params.points.unwrap_or(state.max_fft_points);
    match state.service.latest_fft(index).await? {
        Some(frame) => Ok(Json(frame.decimate(points))),
        None => Err(ApiError::NotFound(format!("no spectrum yet for device {}", index))),
    }
}

pub async fn waterfall(State(state): State<Arc<AppState>>, Path(index): Path<u32>) -> ApiResult<Vec<WaterfallRow>> {
    Ok(Json(state.service.waterfall(index).await?))
}

pub async fn device_bursts(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u32>,
) -> ApiResult<Vec<BurstRecord>> {
    Ok(Json(state.service.bursts(index).await?))
}

/// Bursts of every device, newest first
pub async fn all_bursts(State(state): State<Arc<AppState>>) -> ApiResult<Vec<BurstRecord>> {
    Ok(Json(state.service.all_bursts().await?))
}
