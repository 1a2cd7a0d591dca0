use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::auth::Principal;
use crate::db::{
    CreateRequestParams, RequestListFilter, RequestRecord, RequestStatus, UpdateRequestParams,
};
use crate::portal::requests::{self, RequestActionError};
use crate::portal::validate;
use crate::web::handlers::{
    ApiError, audit_admin, db_error, invalid, not_found, own_client, publish, today,
};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

fn action_error(context: &str, err: RequestActionError) -> ApiError {
    match err {
        RequestActionError::NotFound => not_found("Request"),
        RequestActionError::NotCancellable(_) => (StatusCode::CONFLICT, err.to_string()),
        RequestActionError::Invalid(e) => invalid(e),
        RequestActionError::Database(e) => db_error(context, e),
    }
}

async fn load(state: &AppState, id: Uuid) -> Result<RequestRecord, ApiError> {
    state
        .db
        .get_request(id)
        .await
        .map_err(|e| db_error("Load request", e))?
        .ok_or_else(|| not_found("Request"))
}

// --- Admin ---

pub async fn requests_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RequestListQuery>,
) -> Result<Json<Vec<RequestRecord>>, ApiError> {
    let requests = state
        .db
        .list_requests(&RequestListFilter {
            client_id: query.client_id,
            status: query.status,
        })
        .await
        .map_err(|e| db_error("List requests", e))?;
    Ok(Json(requests))
}

pub async fn requests_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestDetailResponse>, ApiError> {
    let request = load(&state, id).await?;
    Ok(Json(RequestDetailResponse {
        next_statuses: requests::next_statuses(request.status),
        request,
    }))
}

/// Move a request along its lifecycle and/or answer it.
///
/// Transitions outside the lifecycle table answer 409.
pub async fn requests_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<RequestPatchRequest>,
) -> Result<Json<RequestRecord>, ApiError> {
    let params = UpdateRequestParams {
        status: body.status,
        admin_response: body
            .admin_response
            .map(|r| validate::optional_text("admin_response", r, validate::MAX_TEXT_CHARS))
            .transpose()
            .map_err(invalid)?,
    };
    let request = state
        .db
        .update_request(id, &params)
        .await
        .map_err(|e| db_error("Update request", e))?
        .ok_or_else(|| not_found("Request"))?;

    publish(
        &state,
        ChangeTable::Requests,
        ChangeAction::Update,
        id,
        Some(request.client_id),
    );
    audit_admin(
        &principal,
        "request.updated",
        serde_json::json!({ "request_id": id, "status": request.status.as_str() }),
    );
    Ok(Json(request))
}

pub async fn requests_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let request = load(&state, id).await?;
    state
        .db
        .delete_request(id)
        .await
        .map_err(|e| db_error("Delete request", e))?;
    publish(
        &state,
        ChangeTable::Requests,
        ChangeAction::Delete,
        id,
        Some(request.client_id),
    );
    audit_admin(&principal, "request.deleted", serde_json::json!({ "request_id": id }));
    Ok(StatusCode::NO_CONTENT)
}

// --- Client portal ---

pub async fn portal_requests_list_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<RequestListQuery>,
) -> Result<Json<Vec<RequestRecord>>, ApiError> {
    let client_id = own_client(&principal)?;
    let requests = state
        .db
        .list_requests(&RequestListFilter {
            client_id: Some(client_id),
            status: query.status,
        })
        .await
        .map_err(|e| db_error("List requests", e))?;
    Ok(Json(requests))
}

pub async fn portal_requests_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<RequestCreateRequest>,
) -> Result<(StatusCode, Json<RequestRecord>), ApiError> {
    let client_id = own_client(&principal)?;
    requests::check_offer_reference(state.db.as_ref(), body.kind, body.offer_id, today())
        .await
        .map_err(|e| action_error("Create request", e))?;

    let params = CreateRequestParams {
        client_id,
        kind: body.kind,
        subject: validate::require_text("subject", &body.subject, validate::MAX_TITLE_CHARS)
            .map_err(invalid)?,
        body: validate::require_text("body", &body.body, validate::MAX_TEXT_CHARS)
            .map_err(invalid)?,
        offer_id: body.offer_id,
    };
    let request = state
        .db
        .create_request(&params)
        .await
        .map_err(|e| db_error("Create request", e))?;

    publish(
        &state,
        ChangeTable::Requests,
        ChangeAction::Insert,
        request.id,
        Some(client_id),
    );
    tracing::info!(
        request_id = %request.id,
        client_id = %client_id,
        kind = request.kind.as_str(),
        "Client request submitted"
    );
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn portal_requests_get_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestRecord>, ApiError> {
    let client_id = own_client(&principal)?;
    let request = load(&state, id).await?;
    if request.client_id != client_id {
        return Err(not_found("Request"));
    }
    Ok(Json(request))
}

pub async fn portal_requests_cancel_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestRecord>, ApiError> {
    let client_id = own_client(&principal)?;
    let existing = load(&state, id).await?;
    requests::ensure_client_may_cancel(&existing, client_id)
        .map_err(|e| action_error("Cancel request", e))?;

    let request = state
        .db
        .update_request(
            id,
            &UpdateRequestParams {
                status: Some(RequestStatus::Cancelled),
                admin_response: None,
            },
        )
        .await
        .map_err(|e| db_error("Cancel request", e))?
        .ok_or_else(|| not_found("Request"))?;

    publish(
        &state,
        ChangeTable::Requests,
        ChangeAction::Update,
        id,
        Some(client_id),
    );
    Ok(Json(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn action_errors_map_to_statuses() {
        assert_eq!(
            action_error("x", RequestActionError::NotFound).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            action_error("x", RequestActionError::NotCancellable("approved")).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            action_error(
                "x",
                RequestActionError::Invalid(ValidationError::new("offer_id", "missing"))
            )
            .0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
