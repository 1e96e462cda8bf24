//! HTTP route handlers.
//!
//! Handlers are thin: they parse path and query, call the orchestrator and
//! map its errors to status codes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use super::{AppState, TASK_NAME_HEADER};
use crate::discovery::BadTestReason;
use crate::models::{BatchInfo, MethodsInfo, ObjectTypeInfo, StartBatchResponse, UnitResult};
use crate::orchestrator::OrchestratorError;
use crate::queue::DeferredCall;

/// An error response: `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::UnknownBatch(_) => Self::not_found(e.to_string()),
            OrchestratorError::StartOutOfRange { .. } => Self::bad_request(e.to_string()),
            other => {
                error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// GET `get_methods/<fullname>`
pub async fn get_methods(
    State(state): State<Arc<AppState>>,
    Path(fullname): Path<String>,
) -> ApiResult<MethodsInfo> {
    Ok(Json(state.orchestrator.get_methods(&fullname).await?))
}

/// GET `get_methods/`
pub async fn get_all_methods(State(state): State<Arc<AppState>>) -> ApiResult<MethodsInfo> {
    Ok(Json(state.orchestrator.get_methods("").await?))
}

/// GET `object_type/<fullname>`
pub async fn object_type(
    State(state): State<Arc<AppState>>,
    Path(fullname): Path<String>,
) -> ApiResult<ObjectTypeInfo> {
    Ok(Json(state.orchestrator.object_type(&fullname).await?))
}

/// GET `object_type/`
pub async fn root_object_type(State(state): State<Arc<AppState>>) -> ApiResult<ObjectTypeInfo> {
    Ok(Json(state.orchestrator.object_type("").await?))
}

/// POST `start_batch/<fullname>`
pub async fn start_batch(
    State(state): State<Arc<AppState>>,
    Path(fullname): Path<String>,
) -> ApiResult<StartBatchResponse> {
    start_batch_for(&state, &fullname).await
}

/// POST `start_batch/`
pub async fn start_full_batch(State(state): State<Arc<AppState>>) -> ApiResult<StartBatchResponse> {
    start_batch_for(&state, "").await
}

/// 404 if the name resolves to nothing, 500 if its module fails to load.
async fn start_batch_for(state: &AppState, fullname: &str) -> ApiResult<StartBatchResponse> {
    let obj = state.orchestrator.resolve(fullname).await?;
    match obj.bad_reason() {
        Some(BadTestReason::NotFound) => {
            return Err(ApiError::not_found(format!(
                "No test object named '{}' was found",
                fullname
            )));
        }
        Some(BadTestReason::LoadFailed) => {
            let detail = obj
                .load_errors()
                .first()
                .map(|entry| entry.detail().to_string())
                .unwrap_or_default();
            warn!("Cannot start batch for '{}': load failed", fullname);
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load '{}':\n{}", fullname, detail),
            ));
        }
        None => {}
    }
    Ok(Json(state.orchestrator.start_batch(fullname).await?))
}

/// GET `batch_info/<batch_id>`
pub async fn batch_info(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> ApiResult<BatchInfo> {
    Ok(Json(state.orchestrator.batch_info(&batch_id).await?))
}

/// GET `batch_results/<batch_id>?start=<n>`
pub async fn batch_results(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<UnitResult>> {
    let start = parse_start(params.get("start").map(String::as_str))?;
    Ok(Json(state.orchestrator.batch_results(&batch_id, start).await?))
}

fn parse_start(raw: Option<&str>) -> Result<usize, ApiError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    let start: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("start must be an integer, got '{}'", raw)))?;
    usize::try_from(start)
        .map_err(|_| ApiError::bad_request(format!("start must not be negative, got {}", start)))
}

/// POST `deferred/`: runs a deferred call pushed by the queue substrate.
///
/// Requests without the task name header are rejected with 403.
pub async fn run_deferred(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(call): Json<DeferredCall>,
) -> Result<StatusCode, ApiError> {
    let Some(task_name) = headers.get(TASK_NAME_HEADER) else {
        warn!("Rejected deferred {} without a task name", call.name());
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "deferred calls are only accepted from the task queue",
        ));
    };
    tracing::debug!(
        "Running deferred {} for task {:?}",
        call.name(),
        task_name
    );
    state.orchestrator.execute(call).await?;
    Ok(StatusCode::OK)
}
