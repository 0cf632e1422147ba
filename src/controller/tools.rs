//! HTTP tool surface exposed to collaborators.
//!
//! Callers (chat handlers, document pipelines, simulation jobs) never touch
//! the channel directly; they submit work and read results through these
//! endpoints. The zero-argument `/ping` probe answers synchronously so a
//! caller can decide between remote execution and its local fallback.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Controller;
use crate::error::Error;
use crate::task::{Task, TaskKind, TaskStatus};

#[derive(Deserialize)]
pub struct UploadCodeRequest {
    pub code: String,
    pub filename: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Falls back to the controller's default when omitted.
    pub timeout_minutes: Option<i64>,
    pub kind: Option<TaskKind>,
}

#[derive(Serialize)]
pub struct UploadCodeResponse {
    pub task_id: Uuid,
}

#[derive(Deserialize)]
pub struct RunCalculationRequest {
    pub task_id: Uuid,
    #[serde(default)]
    pub execution_params: HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct RunCalculationResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

#[derive(Serialize)]
pub struct GetResultsResponse {
    pub status: TaskStatus,
    pub result: Option<String>,
}

#[derive(Deserialize)]
pub struct AuthenticateRequest {
    #[serde(default)]
    pub test_connection: bool,
}

#[derive(Serialize)]
pub struct AuthenticateResponse {
    pub status: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<ConnectionTest>,
}

#[derive(Serialize)]
pub struct ConnectionTest {
    pub listable: bool,
    pub round_trip: bool,
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TaskSummary {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub filename: String,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

/// Every error variant maps to a response; nothing is silently swallowed.
fn error_response(err: Error) -> Response {
    let (status, category) = match &err {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, None),
        Error::InvalidState { .. } => (StatusCode::CONFLICT, None),
        Error::TaskNotFound(_) | Error::ObjectNotFound(_) => (StatusCode::NOT_FOUND, None),
        // Control signal: poll again later.
        Error::StillRunning(_) => (StatusCode::ACCEPTED, None),
        Error::Timeout { .. } => (StatusCode::GONE, Some("timeout".to_string())),
        Error::Dependency(_) => (StatusCode::BAD_GATEWAY, Some("dependency_error".to_string())),
        Error::Runtime(_) => (StatusCode::BAD_GATEWAY, Some("runtime_error".to_string())),
        Error::ChannelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
        Error::Serialization(_) | Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            category,
        }),
    )
        .into_response()
}

pub fn router(controller: Arc<Controller>) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(ping_handler))
        .route("/tools/upload_code", post(upload_code_handler))
        .route("/tools/run_calculation", post(run_calculation_handler))
        .route("/tools/get_results/:task_id", get(get_results_handler))
        .route("/tools/authenticate", post(authenticate_handler))
        .route("/tools/list_tasks", get(list_tasks_handler))
        .layer(cors)
        .with_state(controller)
}

/// Serves the tool surface until the token fires.
pub async fn serve(
    controller: Arc<Controller>,
    addr: SocketAddr,
    token: CancellationToken,
) -> std::io::Result<()> {
    let app = router(controller);
    tracing::info!(addr = %addr, "Starting tool surface");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

async fn upload_code_handler(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<UploadCodeRequest>,
) -> Response {
    let timeout = req
        .timeout_minutes
        .unwrap_or(controller.config().default_timeout_minutes);
    let kind = req.kind.unwrap_or(TaskKind::CodeExecution);
    match controller
        .submit(
            Bytes::from(req.code),
            &req.filename,
            kind,
            req.requirements,
            timeout,
        )
        .await
    {
        Ok(task_id) => (StatusCode::OK, Json(UploadCodeResponse { task_id })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn run_calculation_handler(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<RunCalculationRequest>,
) -> Response {
    match controller.dispatch(req.task_id, req.execution_params).await {
        Ok(task) => (
            StatusCode::OK,
            Json(RunCalculationResponse {
                task_id: task.id,
                status: task.status,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_results_handler(
    State(controller): State<Arc<Controller>>,
    Path(task_id): Path<Uuid>,
) -> Response {
    match controller.poll_result(task_id).await {
        Ok(task) if task.status == TaskStatus::Failed => {
            let category = task.failure.map(|f| f.to_string());
            (
                StatusCode::GONE,
                Json(ErrorBody {
                    error: task.error.unwrap_or_else(|| "task failed".to_string()),
                    category,
                }),
            )
                .into_response()
        }
        Ok(task) => (
            StatusCode::OK,
            Json(GetResultsResponse {
                status: task.status,
                result: task.result,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn authenticate_handler(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<AuthenticateRequest>,
) -> Response {
    let listable = controller.check_connectivity().await;
    let test_results = if req.test_connection {
        Some(ConnectionTest {
            listable,
            round_trip: round_trip_test(&controller).await,
        })
    } else {
        None
    };

    let status = if listable { "ok" } else { "error" };
    let code = if listable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(AuthenticateResponse {
            status: status.to_string(),
            namespace: controller.namespace().to_string(),
            test_results,
        }),
    )
        .into_response()
}

/// Write/read/delete one probe object to prove the channel accepts writes.
async fn round_trip_test(controller: &Controller) -> bool {
    let name = format!("healthcheck/probe-{}.json", Uuid::new_v4());
    let channel = controller.channel();
    let Ok(id) = channel.put(&name, Bytes::from_static(b"{\"probe\":true}")).await else {
        return false;
    };
    let ok = channel.get(&id).await.is_ok();
    let _ = channel.delete(&id).await;
    ok
}

async fn list_tasks_handler(
    State(controller): State<Arc<Controller>>,
    Query(query): Query<ListTasksQuery>,
) -> Response {
    let filter = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(TaskStatus::Pending),
        Some("running") => Some(TaskStatus::Running),
        Some("completed") => Some(TaskStatus::Completed),
        Some("failed") => Some(TaskStatus::Failed),
        Some(other) => {
            return error_response(Error::Validation(format!("unknown status filter: {other}")))
        }
    };
    let limit = query.limit.unwrap_or(10);
    let tasks = controller.list_tasks(filter, limit).await;
    Json(tasks.into_iter().map(summarize).collect::<Vec<_>>()).into_response()
}

fn summarize(task: Task) -> TaskSummary {
    TaskSummary {
        id: task.id,
        kind: task.kind,
        status: task.status,
        created_at: task.created_at,
        filename: task.filename,
    }
}
