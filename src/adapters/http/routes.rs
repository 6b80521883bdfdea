//! HTTP route handlers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{Project, TaskResult, TaskStatus};
use crate::domain::ports::TaskFilter;
use crate::services::project_service::{
    CreateProjectInput, ProjectConfigPatch, UpdateProjectInput,
};
use crate::services::session_service::{CreateSessionOptions, SessionContext};
use crate::services::task_service::CreateTaskInput;

use super::error::ApiError;
use super::{AppState, CurrentSession};

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn ok(data: impl serde::Serialize) -> ApiResult {
    let data = serde_json::to_value(data)
        .map_err(|e| ApiError::from(DomainError::Internal(e.to_string())))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn resolve_project(state: &AppState, reference: &str) -> Result<Project, ApiError> {
    state
        .ctx
        .projects
        .resolve(reference)
        .await
        .map_err(ApiError::from)
}

/// Project scope for task-id routes: the authenticated session's project,
/// or an explicit `projectId` field when auth is disabled.
async fn project_scope(
    state: &AppState,
    session: Option<&Arc<SessionContext>>,
    body_project: Option<&str>,
) -> Result<Uuid, ApiError> {
    if let Some(session) = session {
        return Ok(session.project.id);
    }
    match body_project {
        Some(reference) => Ok(resolve_project(state, reference).await?.id),
        None => Err(ApiError::bad_request(
            "projectId is required when no session is present",
        )),
    }
}

fn agent_scope(
    session: Option<&Arc<SessionContext>>,
    body_agent: Option<String>,
) -> Result<String, ApiError> {
    body_agent
        .or_else(|| session.map(|s| s.agent.name.clone()))
        .ok_or_else(|| ApiError::bad_request("agentName is required"))
}

// === Health ===

pub async fn health(State(state): State<AppState>) -> ApiResult {
    let report = state
        .ctx
        .storage
        .health_check()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({
        "status": if report.healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": state.ctx.storage.name(),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// === Auth ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    agent_name: String,
    project_id: String,
    #[serde(default)]
    ttl_seconds: Option<u64>,
    #[serde(default)]
    allow_multiple_sessions: bool,
    #[serde(default)]
    resume_existing: bool,
    #[serde(default)]
    data: Option<HashMap<String, serde_json::Value>>,
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> ApiResult {
    let project = state
        .ctx
        .projects
        .validate_access_by_ref(&body.project_id)
        .await
        .map_err(ApiError::from)?;
    let handle = state
        .ctx
        .sessions
        .create(
            &body.agent_name,
            &project,
            CreateSessionOptions {
                ttl_seconds: body.ttl_seconds,
                data: body.data,
                allow_multiple_sessions: body.allow_multiple_sessions,
                resume_existing: body.resume_existing,
            },
        )
        .await
        .map_err(ApiError::from)?;
    ok(handle)
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> ApiResult {
    if let Some(session) = current.0 {
        state
            .ctx
            .sessions
            .destroy(session.session.id)
            .await
            .map_err(ApiError::from)?;
    }
    ok(serde_json::json!({ "loggedOut": true }))
}

pub async fn get_session(Extension(current): Extension<CurrentSession>) -> ApiResult {
    let Some(session) = current.0 else {
        return Err(ApiError::unauthorized("no active session"));
    };
    ok(session.as_ref())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    data: HashMap<String, serde_json::Value>,
}

pub async fn update_session(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Json(body): Json<UpdateSessionRequest>,
) -> ApiResult {
    let Some(session) = current.0 else {
        return Err(ApiError::unauthorized("no active session"));
    };
    let updated = state
        .ctx
        .sessions
        .update_data(session.session.id, body.data)
        .await
        .map_err(ApiError::from)?;
    ok(updated)
}

// === Projects ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeClosedQuery {
    #[serde(default)]
    include_closed: bool,
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<IncludeClosedQuery>,
) -> ApiResult {
    let projects = state
        .ctx
        .projects
        .list(query.include_closed)
        .await
        .map_err(ApiError::from)?;
    ok(projects)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    config: Option<ProjectConfigPatch>,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> ApiResult {
    let project = state
        .ctx
        .projects
        .create(CreateProjectInput {
            name: body.name,
            description: body.description.unwrap_or_default(),
            instructions: body.instructions,
            config: body.config,
        })
        .await
        .map_err(ApiError::from)?;
    ok(project)
}

pub async fn get_project(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    ok(resolve_project(&state, &id).await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    config: Option<ProjectConfigPatch>,
    #[serde(default)]
    status: Option<String>,
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> ApiResult {
    let project = resolve_project(&state, &id).await?;
    let updated = state
        .ctx
        .projects
        .update(
            project.id,
            UpdateProjectInput {
                name: body.name,
                description: body.description,
                instructions: body.instructions,
                config: body.config,
            },
        )
        .await
        .map_err(ApiError::from)?;
    // Closing via update is a separate transition.
    if body.status.as_deref() == Some("closed") {
        let closed = state
            .ctx
            .projects
            .close(project.id)
            .await
            .map_err(ApiError::from)?;
        return ok(closed);
    }
    ok(updated)
}

pub async fn delete_project(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let project = resolve_project(&state, &id).await?;
    state
        .ctx
        .projects
        .delete(project.id)
        .await
        .map_err(ApiError::from)?;
    ok(serde_json::json!({ "deleted": project.id }))
}

pub async fn project_stats(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let project = resolve_project(&state, &id).await?;
    let status = state
        .ctx
        .projects
        .status(project.id)
        .await
        .map_err(ApiError::from)?;
    ok(status)
}

// === Tasks ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    type_id: Option<Uuid>,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    batch_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

fn default_limit() -> u64 {
    50
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult {
    let project = resolve_project(&state, &id).await?;
    let status = match query.status.as_deref() {
        Some(raw) => Some(TaskStatus::from_str(raw).ok_or_else(|| {
            ApiError::bad_request(format!("invalid status filter: {raw}"))
        })?),
        None => None,
    };
    let filter = TaskFilter {
        status,
        type_id: query.type_id,
        assigned_to: query.assigned_to,
        batch_id: query.batch_id,
        limit: query.limit,
        offset: query.offset,
    };
    let page = state
        .ctx
        .tasks
        .list(project.id, &filter)
        .await
        .map_err(ApiError::from)?;
    ok(page)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    type_ref: String,
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult {
    let project = state
        .ctx
        .projects
        .validate_access_by_ref(&id)
        .await
        .map_err(ApiError::from)?;
    let task_type = state
        .ctx
        .task_types
        .resolve(project.id, &body.type_ref)
        .await
        .map_err(ApiError::from)?;
    let outcome = state
        .ctx
        .tasks
        .create(
            &project,
            &task_type,
            CreateTaskInput {
                id: body.id,
                description: body.description,
                instructions: body.instructions,
                variables: body.variables,
            },
        )
        .await
        .map_err(ApiError::from)?;
    ok(outcome)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTaskRequest {
    #[serde(default)]
    agent_name: Option<String>,
}

pub async fn next_task(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> ApiResult {
    let project = state
        .ctx
        .projects
        .validate_access_by_ref(&id)
        .await
        .map_err(ApiError::from)?;
    // The body is optional; an empty body means "any agent name".
    let parsed: NextTaskRequest = if body.is_empty() {
        NextTaskRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?
    };
    let agent_name = parsed
        .agent_name
        .or_else(|| current.0.as_ref().map(|s| s.agent.name.clone()));
    let outcome = state
        .ctx
        .tasks
        .get_next(&project, agent_name)
        .await
        .map_err(ApiError::from)?;
    ok(outcome)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

pub async fn complete_task(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteTaskRequest>,
) -> ApiResult {
    let session = current.0;
    let project_id = project_scope(&state, session.as_ref(), body.project_id.as_deref()).await?;
    let agent_name = agent_scope(session.as_ref(), body.agent_name)?;
    let result = body
        .result
        .unwrap_or_else(|| TaskResult::ok(body.output.unwrap_or_default()));
    let task = state
        .ctx
        .tasks
        .complete(project_id, id, &agent_name, result)
        .await
        .map_err(ApiError::from)?;
    ok(task)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailTaskRequest {
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
    #[serde(default = "default_true")]
    can_retry: bool,
}

fn default_true() -> bool {
    true
}

pub async fn fail_task(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(id): Path<Uuid>,
    Json(body): Json<FailTaskRequest>,
) -> ApiResult {
    let session = current.0;
    let project_id = project_scope(&state, session.as_ref(), body.project_id.as_deref()).await?;
    let agent_name = agent_scope(session.as_ref(), body.agent_name)?;
    let result = body
        .result
        .unwrap_or_else(|| TaskResult::err(body.error.unwrap_or_else(|| "task failed".to_string())));
    let task = state
        .ctx
        .tasks
        .fail(project_id, id, &agent_name, result, body.can_retry)
        .await
        .map_err(ApiError::from)?;
    ok(task)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLeaseRequest {
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    minutes: u32,
}

pub async fn extend_lease(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(id): Path<Uuid>,
    Json(body): Json<ExtendLeaseRequest>,
) -> ApiResult {
    let session = current.0;
    let project_id = project_scope(&state, session.as_ref(), body.project_id.as_deref()).await?;
    let agent_name = agent_scope(session.as_ref(), body.agent_name)?;
    let task = state
        .ctx
        .tasks
        .extend_lease(project_id, id, &agent_name, body.minutes)
        .await
        .map_err(ApiError::from)?;
    ok(task)
}
