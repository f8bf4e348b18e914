//! Workflow CRUD, lifecycle, manual execution, history, and webhook
//! ingress.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::runtimes::{ExecutionOutcome, WorkflowUpdate};
use crate::server::rate_limit::LimitCategory;
use crate::server::{ApiError, AppState, ClientIp, RequireAdmin};

#[derive(Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Option<Value>,
    #[serde(default)]
    pub edges: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateWorkflowRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Option<Value>,
    #[serde(default)]
    pub edges: Option<Value>,
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

fn outcome_body(outcome: ExecutionOutcome) -> Json<Value> {
    let mut body = json!({
        "status": if outcome.ok { "success" } else { "error" },
        "message": outcome.message,
        "execution_id": outcome.execution_id,
        "logs": outcome.logs,
    });
    if outcome.already_running {
        body["already_running"] = json!(true);
    }
    Json(body)
}

/// `GET /api/workflows`.
pub async fn list(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Read, ip)?;
    let workflows = state.engine.store().list_workflows().await?;
    Ok(Json(json!(workflows)))
}

/// `POST /api/workflows`.
pub async fn create(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("Workflow name is required"));
    }
    let nodes = request.nodes.unwrap_or_else(|| json!([]));
    let edges = request.edges.unwrap_or_else(|| json!([]));
    let workflow = state
        .engine
        .store()
        .create_workflow(
            request.name.trim(),
            request.description.as_deref(),
            &nodes,
            &edges,
        )
        .await?;
    Ok(Json(json!(workflow)))
}

/// `GET /api/workflows/{id}`.
pub async fn get_one(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Read, ip)?;
    let workflow = state
        .engine
        .store()
        .get_workflow(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow not found"))?;
    Ok(Json(json!(workflow)))
}

/// `PUT /api/workflows/{id}`.
pub async fn update(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
    Json(request): Json<UpdateWorkflowRequest>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    let workflow = state
        .engine
        .store()
        .update_workflow(
            id,
            WorkflowUpdate {
                name: request.name,
                description: request.description,
                nodes: request.nodes,
                edges: request.edges,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow not found"))?;
    Ok(Json(json!(workflow)))
}

/// `DELETE /api/workflows/{id}` — removes the schedule job first.
pub async fn delete(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    if let Some(workflow) = state.engine.store().get_workflow(id).await? {
        if let Some(job_id) = workflow.schedule_job_id.as_deref() {
            state.scheduler.remove_job(job_id);
        }
    }
    let deleted = state.engine.store().delete_workflow(id).await?;
    if !deleted {
        return Err(ApiError::not_found("Workflow not found"));
    }
    Ok(Json(json!({ "status": "success" })))
}

/// `POST /api/workflows/{id}/activate`.
pub async fn activate(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    match state.scheduler.activate_workflow(id).await {
        Ok((job_id, next_run)) => Ok(Json(json!({
            "status": "success",
            "message": "Workflow activated",
            "job_id": job_id,
            "next_run": next_run.map(|at| at.to_rfc3339()),
        }))),
        Err(err) => Err(ApiError::bad_request(err.to_string())),
    }
}

/// `POST /api/workflows/{id}/deactivate`.
pub async fn deactivate(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Mutate, ip)?;
    state
        .scheduler
        .deactivate_workflow(id)
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(Json(json!({
        "status": "success",
        "message": "Workflow deactivated",
    })))
}

/// `POST /api/workflows/{id}/execute` — manual run.
pub async fn execute(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Execute, ip)?;
    let outcome = state.engine.execute_workflow(id, None).await;
    Ok(outcome_body(outcome))
}

/// `GET /api/workflows/{id}/executions?limit=N` — newest first.
pub async fn executions(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Read, ip)?;
    let limit = query.limit.unwrap_or(50).min(200);
    let executions = state.engine.store().list_executions(id, limit).await?;
    Ok(Json(json!(executions)))
}

/// `POST /api/webhook/{id}` — anonymous trigger with an arbitrary JSON
/// body forwarded into the execution context as `webhook`.
pub async fn webhook(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    state.limit(LimitCategory::Execute, ip)?;
    let payload = body.map(|Json(value)| value).unwrap_or_else(|| json!({}));
    let outcome = state.engine.execute_workflow(id, Some(payload)).await;
    Ok(outcome_body(outcome))
}
