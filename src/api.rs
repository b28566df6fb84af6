//! HTTP endpoints for triggering and inspecting pipeline stages.
//!
//! Every route answers with `{success, message, data}`. Errors answer with
//! `{success: false, message, kind}` plus `existing_task_id` on conflicts.

use crate::context::PipelineContext;
use crate::db::models::{Task, TaskType};
use crate::error::{ErrorKind, PipelineError};
use crate::stages::{self, digest::DigestRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

/// Build the axum router over a pipeline context
pub fn router(ctx: PipelineContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task))
        .route("/tasks/execute", post(execute_task))
        .route("/tasks/reap", post(reap_tasks))
        .route("/tasks/:id", get(get_task))
        .route("/fetch/dispatch", post(dispatch_fetch))
        .route("/fetch/jobs", post(run_fetch_job))
        .route("/summaries/dispatch", post(dispatch_summaries))
        .route("/digests", post(generate_digest))
        .route("/monitor/run", post(run_monitor))
        .route("/scheduler/run", post(run_scheduler))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data,
    })
}

/// Error side of every handler
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ExternalService => StatusCode::BAD_GATEWAY,
            ErrorKind::Persistence | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let mut body = json!({
            "success": false,
            "message": self.0.to_string(),
            "kind": kind.as_str(),
        });
        if let PipelineError::Conflict {
            existing_task_id, ..
        } = &self.0
        {
            body["existing_task_id"] = json!(existing_task_id);
        }

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(PipelineError::Validation(rejection.body_text()))
    }
}

/// JSON body extractor whose rejections use the error envelope
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub owner_id: String,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
}

#[derive(Debug, Deserialize)]
pub struct TaskIdRequest {
    pub task_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeRequest {
    #[serde(default)]
    pub task_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FetchJobRequest {
    pub job_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct GenerateDigestRequest {
    pub owner_id: String,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub timezone: Option<String>,
}

async fn health() -> Json<ApiResponse<serde_json::Value>> {
    ok("ok", json!({ "service": "digest-pipeline" }))
}

async fn create_task(
    State(ctx): State<PipelineContext>,
    ApiJson(req): ApiJson<CreateTaskRequest>,
) -> std::result::Result<(StatusCode, Json<ApiResponse<Task>>), ApiError> {
    let task = stages::submit_task(
        &ctx,
        &req.owner_id,
        req.time_range.as_deref().unwrap_or("week"),
        req.task_type.unwrap_or(TaskType::Digest),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        ok(format!("Task {} created", task.id), task),
    ))
}

async fn execute_task(
    State(ctx): State<PipelineContext>,
    ApiJson(req): ApiJson<TaskIdRequest>,
) -> ApiResult<stages::ExecutionReport> {
    let report = stages::execute_task(&ctx, req.task_id).await?;
    Ok(ok(format!("Task {} executed", req.task_id), report))
}

async fn get_task(State(ctx): State<PipelineContext>, Path(id): Path<i64>) -> ApiResult<Task> {
    let task = ctx
        .store
        .get_task(id)
        .await?
        .ok_or(PipelineError::TaskNotFound(id))?;
    Ok(ok(format!("Task {} is {}", task.id, task.status), task))
}

async fn reap_tasks(State(ctx): State<PipelineContext>) -> ApiResult<Vec<Task>> {
    let reaped = stages::reap_stuck_tasks(&ctx).await?;
    Ok(ok(format!("Reaped {} task(s)", reaped.len()), reaped))
}

async fn dispatch_fetch(
    State(ctx): State<PipelineContext>,
    ApiJson(req): ApiJson<ScopeRequest>,
) -> ApiResult<stages::FetchDispatchReport> {
    let report = stages::dispatch_fetch(&ctx, req.task_id).await?;
    Ok(ok(format!("Dispatched {} fetch job(s)", report.claimed), report))
}

async fn run_fetch_job(
    State(ctx): State<PipelineContext>,
    ApiJson(req): ApiJson<FetchJobRequest>,
) -> ApiResult<stages::FetchWorkerReport> {
    let report = stages::run_fetch_worker(&ctx, req.job_id).await?;
    Ok(ok(format!("Fetch job {} handled", req.job_id), report))
}

async fn dispatch_summaries(
    State(ctx): State<PipelineContext>,
    ApiJson(req): ApiJson<ScopeRequest>,
) -> ApiResult<stages::SummaryDispatchReport> {
    let report = stages::dispatch_summaries(&ctx, req.task_id).await?;
    Ok(ok(
        format!("Summarized {} of {} job(s)", report.summarized, report.selected),
        report,
    ))
}

async fn generate_digest(
    State(ctx): State<PipelineContext>,
    ApiJson(req): ApiJson<GenerateDigestRequest>,
) -> ApiResult<stages::DigestOutcome> {
    let request = DigestRequest {
        owner_id: req.owner_id,
        time_range: req.time_range.unwrap_or_else(|| "week".to_string()),
        task_id: req.task_id,
        partial: req.partial,
        timezone: req.timezone,
    };
    let outcome = stages::generate_digest(&ctx, &request).await?;
    let message = match &outcome {
        stages::DigestOutcome::Generated { digest, .. } => format!("Digest {} generated", digest.id),
        stages::DigestOutcome::Empty { reason } => reason.clone(),
    };
    Ok(ok(message, outcome))
}

async fn run_monitor(State(ctx): State<PipelineContext>) -> ApiResult<stages::MonitorReport> {
    let report = stages::run_monitor(&ctx).await?;
    Ok(ok(format!("Checked {} task(s)", report.checked), report))
}

async fn run_scheduler(State(ctx): State<PipelineContext>) -> ApiResult<stages::SchedulerReport> {
    let report = stages::tick(&ctx).await?;
    Ok(ok(
        format!("Dispatched {} scheduled digest(s)", report.dispatched),
        report,
    ))
}
