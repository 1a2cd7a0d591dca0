use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::auth::Principal;
use crate::db::{
    ClientListFilter, ClientRecord, ClientStatus, CreateClientParams, ResourceListFilter,
    UpdateClientParams,
};
use crate::portal::{export, validate};
use crate::web::handlers::{
    ApiError, audit_admin, db_error, invalid, not_found, own_client, publish,
};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

fn optional_nullable<F>(
    value: Option<Option<String>>,
    check: F,
) -> Result<Option<Option<String>>, ApiError>
where
    F: Fn(Option<String>) -> Result<Option<String>, crate::error::ValidationError>,
{
    value.map(check).transpose().map_err(invalid)
}

fn client_filter(query: ClientListQuery) -> ClientListFilter {
    ClientListFilter {
        query: validate::trim_optional(query.q),
        status: query.status,
    }
}

pub async fn clients_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientListQuery>,
) -> Result<Json<Vec<ClientRecord>>, ApiError> {
    let clients = state
        .db
        .list_clients(&client_filter(query))
        .await
        .map_err(|e| db_error("List clients", e))?;
    Ok(Json(clients))
}

pub async fn clients_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ClientCreateRequest>,
) -> Result<(StatusCode, Json<ClientRecord>), ApiError> {
    let params = CreateClientParams {
        name: validate::client_name(&body.name).map_err(invalid)?,
        company: validate::optional_text("company", body.company, validate::MAX_TITLE_CHARS)
            .map_err(invalid)?,
        email: validate::optional_email(body.email).map_err(invalid)?,
        phone: validate::optional_phone(body.phone).map_err(invalid)?,
        website: validate::optional_url("website", body.website).map_err(invalid)?,
        status: body.status.unwrap_or(ClientStatus::Lead),
        notes: validate::optional_text("notes", body.notes, validate::MAX_TEXT_CHARS)
            .map_err(invalid)?,
    };
    let client = state
        .db
        .create_client(&params)
        .await
        .map_err(|e| db_error("Create client", e))?;

    publish(&state, ChangeTable::Clients, ChangeAction::Insert, client.id, Some(client.id));
    audit_admin(
        &principal,
        "client.created",
        serde_json::json!({ "client_id": client.id, "name": client.name }),
    );
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn clients_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClientRecord>, ApiError> {
    state
        .db
        .get_client(id)
        .await
        .map_err(|e| db_error("Load client", e))?
        .map(Json)
        .ok_or_else(|| not_found("Client"))
}

pub async fn clients_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<ClientPatchRequest>,
) -> Result<Json<ClientRecord>, ApiError> {
    let params = UpdateClientParams {
        name: body
            .name
            .map(|name| validate::client_name(&name))
            .transpose()
            .map_err(invalid)?,
        company: optional_nullable(body.company, |v| {
            validate::optional_text("company", v, validate::MAX_TITLE_CHARS)
        })?,
        email: optional_nullable(body.email, validate::optional_email)?,
        phone: optional_nullable(body.phone, validate::optional_phone)?,
        website: optional_nullable(body.website, |v| validate::optional_url("website", v))?,
        status: body.status,
        notes: optional_nullable(body.notes, |v| {
            validate::optional_text("notes", v, validate::MAX_TEXT_CHARS)
        })?,
    };
    let client = state
        .db
        .update_client(id, &params)
        .await
        .map_err(|e| db_error("Update client", e))?
        .ok_or_else(|| not_found("Client"))?;

    publish(&state, ChangeTable::Clients, ChangeAction::Update, id, Some(id));
    audit_admin(
        &principal,
        "client.updated",
        serde_json::json!({ "client_id": id, "status": client.status.as_str() }),
    );
    Ok(Json(client))
}

/// Delete a client together with its tasks, chat, requests, accounts and
/// private resources. Files attached to those resources are removed too.
pub async fn clients_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let private_files: Vec<String> = state
        .db
        .list_resources(&ResourceListFilter {
            visible_to: Some(id),
            category: None,
        })
        .await
        .map_err(|e| db_error("Delete client", e))?
        .into_iter()
        .filter(|resource| resource.client_id == Some(id))
        .filter_map(|resource| resource.file.map(|file| file.key))
        .collect();

    if !state
        .db
        .delete_client(id)
        .await
        .map_err(|e| db_error("Delete client", e))?
    {
        return Err(not_found("Client"));
    }

    for key in private_files {
        if let Err(e) = state.files.delete(&key).await {
            tracing::warn!(key = %key, "Failed to remove file of deleted client: {}", e);
        }
    }
    publish(&state, ChangeTable::Clients, ChangeAction::Delete, id, Some(id));
    audit_admin(&principal, "client.deleted", serde_json::json!({ "client_id": id }));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clients_export_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ClientListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let clients = state
        .db
        .list_clients(&client_filter(query))
        .await
        .map_err(|e| db_error("Export clients", e))?;
    let csv = export::clients_csv(&clients).map_err(|e| {
        tracing::error!("Failed to render client CSV: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Export clients failed".to_string(),
        )
    })?;
    audit_admin(
        &principal,
        "client.exported",
        serde_json::json!({ "count": clients.len() }),
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"clients.csv\"",
            ),
        ],
        csv,
    ))
}

// --- Client portal ---

pub async fn portal_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<MeResponse>, ApiError> {
    let client_id = own_client(&principal)?;
    let client = state
        .db
        .get_client(client_id)
        .await
        .map_err(|e| db_error("Load profile", e))?
        .ok_or_else(|| not_found("Client"))?;
    Ok(Json(MeResponse { principal, client }))
}

/// Clients may correct their own contact details, nothing else.
pub async fn portal_profile_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ProfilePatchRequest>,
) -> Result<Json<ClientRecord>, ApiError> {
    let client_id = own_client(&principal)?;
    let params = UpdateClientParams {
        email: optional_nullable(body.email, validate::optional_email)?,
        phone: optional_nullable(body.phone, validate::optional_phone)?,
        website: optional_nullable(body.website, |v| validate::optional_url("website", v))?,
        ..Default::default()
    };
    let client = state
        .db
        .update_client(client_id, &params)
        .await
        .map_err(|e| db_error("Update profile", e))?
        .ok_or_else(|| not_found("Client"))?;
    publish(
        &state,
        ChangeTable::Clients,
        ChangeAction::Update,
        client_id,
        Some(client_id),
    );
    Ok(Json(client))
}
