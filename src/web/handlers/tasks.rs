use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::auth::Principal;
use crate::auth::access::can_access_client;
use crate::db::{
    CreateTaskParams, TaskListFilter, TaskPriority, TaskRecord, TaskStatus, UpdateTaskParams,
};
use crate::portal::{export, validate};
use crate::web::handlers::{
    ApiError, audit_admin, db_error, invalid, not_found, own_client, publish,
};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

fn task_filter(state: &AppState, query: TaskListQuery, client_id: Option<Uuid>) -> TaskListFilter {
    TaskListFilter {
        client_id,
        status: query.status,
        priority: query.priority,
        sort: query.sort.unwrap_or_default(),
        limit: query.limit.map(|l| l.min(state.portal.page_size_limit)),
    }
}

pub async fn tasks_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    let client_id = query.client_id;
    let tasks = state
        .db
        .list_tasks(&task_filter(&state, query, client_id))
        .await
        .map_err(|e| db_error("List tasks", e))?;
    Ok(Json(tasks))
}

pub async fn tasks_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<TaskCreateRequest>,
) -> Result<(StatusCode, Json<TaskRecord>), ApiError> {
    let params = CreateTaskParams {
        client_id: body.client_id,
        title: validate::require_text("title", &body.title, validate::MAX_TITLE_CHARS)
            .map_err(invalid)?,
        description: validate::optional_text(
            "description",
            body.description,
            validate::MAX_TEXT_CHARS,
        )
        .map_err(invalid)?,
        status: body.status.unwrap_or(TaskStatus::Todo),
        priority: body.priority.unwrap_or(TaskPriority::Medium),
        due_date: body.due_date,
    };
    let task = state
        .db
        .create_task(&params)
        .await
        .map_err(|e| db_error("Create task", e))?;

    publish(&state, ChangeTable::Tasks, ChangeAction::Insert, task.id, Some(task.client_id));
    audit_admin(
        &principal,
        "task.created",
        serde_json::json!({ "task_id": task.id, "client_id": task.client_id }),
    );
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn tasks_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, ApiError> {
    state
        .db
        .get_task(id)
        .await
        .map_err(|e| db_error("Load task", e))?
        .map(Json)
        .ok_or_else(|| not_found("Task"))
}

pub async fn tasks_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<TaskPatchRequest>,
) -> Result<Json<TaskRecord>, ApiError> {
    let params = UpdateTaskParams {
        title: body
            .title
            .map(|t| validate::require_text("title", &t, validate::MAX_TITLE_CHARS))
            .transpose()
            .map_err(invalid)?,
        description: body
            .description
            .map(|d| validate::optional_text("description", d, validate::MAX_TEXT_CHARS))
            .transpose()
            .map_err(invalid)?,
        status: body.status,
        priority: body.priority,
        due_date: body.due_date,
    };
    let task = state
        .db
        .update_task(id, &params)
        .await
        .map_err(|e| db_error("Update task", e))?
        .ok_or_else(|| not_found("Task"))?;

    publish(&state, ChangeTable::Tasks, ChangeAction::Update, id, Some(task.client_id));
    audit_admin(
        &principal,
        "task.updated",
        serde_json::json!({ "task_id": id, "status": task.status.as_str() }),
    );
    Ok(Json(task))
}

pub async fn tasks_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let task = state
        .db
        .get_task(id)
        .await
        .map_err(|e| db_error("Delete task", e))?
        .ok_or_else(|| not_found("Task"))?;
    state
        .db
        .delete_task(id)
        .await
        .map_err(|e| db_error("Delete task", e))?;

    publish(&state, ChangeTable::Tasks, ChangeAction::Delete, id, Some(task.client_id));
    audit_admin(&principal, "task.deleted", serde_json::json!({ "task_id": id }));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn tasks_export_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = query.client_id;
    let mut filter = task_filter(&state, query, client_id);
    filter.limit = None;
    let tasks = state
        .db
        .list_tasks(&filter)
        .await
        .map_err(|e| db_error("Export tasks", e))?;
    let csv = export::tasks_csv(&tasks).map_err(|e| {
        tracing::error!("Failed to render task CSV: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Export tasks failed".to_string(),
        )
    })?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"tasks.csv\"",
            ),
        ],
        csv,
    ))
}

// --- Client portal ---

/// Tasks of the caller's own client. A `client_id` in the query is ignored.
pub async fn portal_tasks_list_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    let client_id = own_client(&principal)?;
    let tasks = state
        .db
        .list_tasks(&task_filter(&state, query, Some(client_id)))
        .await
        .map_err(|e| db_error("List tasks", e))?;
    Ok(Json(tasks))
}

pub async fn portal_tasks_get_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, ApiError> {
    state
        .db
        .get_task(id)
        .await
        .map_err(|e| db_error("Load task", e))?
        .filter(|task| can_access_client(&principal, task.client_id))
        .map(Json)
        .ok_or_else(|| not_found("Task"))
}
