//! Loopback control API: the trigger surface for captures, settings, and the
//! region recorder.
//!
//! Capture routes are fire-and-forget: they spawn the capture and answer 202
//! immediately; the download is the only observable effect and failures stay
//! in the log, never in a response.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capture::{CaptureMode, CaptureOrchestrator};
use crate::db::Database;
use crate::inspector::{OutputFormat, WatcherStatus};
use crate::recorder::RecorderController;
use crate::settings::{RawCaptureSettings, SettingsStore};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CaptureOrchestrator>,
    pub recorder: Arc<RecorderController>,
    pub settings: Arc<SettingsStore>,
    pub db: Database,
    pub watcher: Arc<WatcherStatus>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/capture/single", post(capture_single))
        .route("/capture/burst", post(capture_burst))
        .route("/capture/toolbar", post(capture_toolbar))
        .route("/settings", get(get_settings).post(save_settings))
        .route("/status", get(status))
        .route("/record/start", post(record_start))
        .route("/record/stop", post(record_stop))
        .route("/record/toggle", post(record_toggle))
        .route("/recordings", get(list_recordings))
        .route("/recordings/:id/tags", post(update_tags))
        .route("/clip/:id", get(get_clip))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct CaptureRequest {
    format: Option<String>,
}

impl CaptureRequest {
    fn output_format(&self) -> OutputFormat {
        match self.format.as_deref() {
            Some("png") => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        }
    }
}

fn spawn_capture(state: &AppState, mode: CaptureMode, format: OutputFormat) -> StatusCode {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.handle_capture(mode, format).await;
    });
    StatusCode::ACCEPTED
}

async fn capture_single(
    State(state): State<AppState>,
    body: Option<Json<CaptureRequest>>,
) -> StatusCode {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    spawn_capture(&state, CaptureMode::Single, request.output_format())
}

async fn capture_burst(
    State(state): State<AppState>,
    body: Option<Json<CaptureRequest>>,
) -> StatusCode {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    spawn_capture(&state, CaptureMode::Burst, request.output_format())
}

async fn capture_toolbar(
    State(state): State<AppState>,
    body: Option<Json<CaptureRequest>>,
) -> StatusCode {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    spawn_capture(&state, CaptureMode::AutoToolbar, request.output_format())
}

async fn get_settings(State(state): State<AppState>) -> Response {
    Json(state.settings.capture()).into_response()
}

#[derive(Debug, Deserialize)]
struct SaveSettingsRequest {
    settings: RawCaptureSettings,
}

async fn save_settings(
    State(state): State<AppState>,
    Json(request): Json<SaveSettingsRequest>,
) -> Response {
    match state.settings.update_capture(request.settings) {
        Ok(effective) => {
            info!("settings saved: {effective:?}");
            Json(json!({ "ok": true })).into_response()
        }
        Err(err) => {
            error!("failed to persist settings: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReply {
    video_ready: bool,
    page_url: Option<String>,
    recording_id: Option<i64>,
}

async fn status(State(state): State<AppState>) -> Json<StatusReply> {
    Json(StatusReply {
        video_ready: state.watcher.video_ready(),
        page_url: state.watcher.page_url(),
        recording_id: state.recorder.current().await,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RecordStartRequest {
    fps: Option<u32>,
}

async fn record_start(
    State(state): State<AppState>,
    body: Option<Json<RecordStartRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    match state.recorder.start(request.fps).await {
        Ok(started) => Json(json!({
            "ok": true,
            "recording_id": started.recording_id,
            "path": started.path,
        }))
        .into_response(),
        Err(err) => {
            error!("record start failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecordStopRequest {
    recording_id: Option<i64>,
}

async fn record_stop(
    State(state): State<AppState>,
    body: Option<Json<RecordStopRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    match state.recorder.stop(request.recording_id).await {
        Ok(stopped) => Json(json!({
            "ok": true,
            "recording_id": stopped.recording_id,
            "path": stopped.path,
        }))
        .into_response(),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })).into_response(),
    }
}

async fn record_toggle(State(state): State<AppState>) -> Response {
    match state.recorder.toggle(None).await {
        Ok(outcome) => Json(json!({ "ok": true, "outcome": outcome })).into_response(),
        Err(err) => {
            error!("record toggle failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    search: Option<String>,
    tag: Option<String>,
}

async fn list_recordings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.db.list_recordings(query.search, query.tag).await {
        Ok(recordings) => Json(recordings).into_response(),
        Err(err) => {
            error!("failed to list recordings: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnnotationsRequest {
    tags: Option<String>,
    note: Option<String>,
}

async fn update_tags(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AnnotationsRequest>,
) -> Response {
    match state
        .db
        .update_annotations(id, request.tags, request.note)
        .await
    {
        Ok(true) => Json(json!({ "ok": true })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": "recording not found" })),
        )
            .into_response(),
        Err(err) => {
            error!("failed to update annotations: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_clip(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let path = match state.db.recording_path(id).await {
        Ok(Some(path)) => path,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("failed to look up clip {id}: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let filename = std::path::Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("clip_{id}.mp4"));

    (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}
