//! HTTP surface: `POST /process_image` and `GET /status`.

use crate::pipeline::{Pipeline, PipelineError, ResultNotifier};
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use rollcall_core::{AttendanceRequest, Metric, PresenceReport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub notifier: Arc<dyn ResultNotifier>,
    pub started_at: DateTime<Utc>,
    /// In-flight webhook deliveries, drained on shutdown.
    pub deliveries: TaskTracker,
}

impl AppState {
    pub fn new(pipeline: Pipeline, notifier: Arc<dyn ResultNotifier>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            notifier,
            started_at: Utc::now(),
            deliveries: TaskTracker::new(),
        }
    }
}

#[derive(Serialize)]
struct ProcessResponse {
    message: &'static str,
    presence_report: PresenceReport,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    started_at: DateTime<Utc>,
    metric: Metric,
    tolerance: f32,
    fetch_concurrency: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/process_image", post(process_image))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn process_image(
    State(state): State<AppState>,
    Json(request): Json<AttendanceRequest>,
) -> Result<Json<ProcessResponse>, PipelineError> {
    let attendance_id = request.attendance_id.clone();
    let span = tracing::info_span!(
        "reconcile",
        attendance = %attendance_id,
        request = %Uuid::new_v4()
    );

    let pipeline = state.pipeline.clone();
    let task = async move { pipeline.reconcile(&request).await }.instrument(span.clone());
    let reconciliation = tokio::spawn(task)
        .await
        .map_err(|e| PipelineError::Internal(format!("reconciliation task failed: {e}")))??;

    span.in_scope(|| {
        for entry in &reconciliation.skipped {
            tracing::debug!(student = %entry.id, reason = %entry.reason, "excluded from report");
        }
        tracing::debug!(faces = reconciliation.faces_detected, "responding");
    });

    let notifier = state.notifier.clone();
    let report = reconciliation.report.clone();
    state.deliveries.spawn(
        async move {
            match notifier.notify(&attendance_id, &report).await {
                Ok(()) => tracing::debug!("presence report delivered"),
                Err(e) => tracing::warn!(error = %e, "presence report delivery failed"),
            }
        }
        .instrument(span),
    );

    Ok(Json(ProcessResponse {
        message: "Presence report generated",
        presence_report: reconciliation.report,
    }))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let matcher = state.pipeline.matcher();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        metric: matcher.metric,
        tolerance: matcher.tolerance,
        fetch_concurrency: state.pipeline.concurrency(),
    })
}

/// Stop accepting deliveries and wait up to `grace` for those in flight.
/// Returns how many were abandoned.
pub async fn drain_deliveries(deliveries: &TaskTracker, grace: Duration) -> usize {
    deliveries.close();
    if deliveries.is_empty() {
        return 0;
    }
    tracing::info!(pending = deliveries.len(), "waiting for webhook deliveries");
    match tokio::time::timeout(grace, deliveries.wait()).await {
        Ok(()) => 0,
        Err(_) => {
            let abandoned = deliveries.len();
            tracing::warn!(abandoned, "webhook deliveries abandoned at shutdown");
            abandoned
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "reconciliation failed");
        let (status, body) = match &self {
            PipelineError::AttendanceDownload { status } => (
                StatusCode::BAD_REQUEST,
                format!("Failed to download attendance image: {status}"),
            ),
            PipelineError::AttendanceImage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing attendance image".to_string(),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing images: {other}"),
            ),
        };
        (status, body).into_response()
    }
}
