use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use uuid::Uuid;

use crate::auth::Principal;
use crate::auth::access::tenant_scope;
use crate::db::{
    CreateResourceParams, ResourceListFilter, ResourceRecord, StoredFileRef,
    UpdateResourceParams,
};
use crate::portal::validate;
use crate::web::handlers::{
    ApiError, audit_admin, db_error, invalid, not_found, own_client, publish, storage_error,
};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

const MAX_CATEGORY_CHARS: usize = 80;

/// Fields of a multipart resource upload.
#[derive(Debug, Default)]
struct UploadForm {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    client_id: Option<Uuid>,
    file: Option<(String, Option<String>, Bytes)>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Multipart read error: {e}"),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload.bin").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read upload body: {e}"),
                )
            })?;
            form.file = Some((file_name, content_type, data));
            continue;
        }

        let text = field.text().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read field '{name}': {e}"),
            )
        })?;
        match name.as_str() {
            "title" => form.title = Some(text),
            "description" => form.description = Some(text),
            "category" => form.category = Some(text),
            "client_id" if !text.trim().is_empty() => {
                let id = text.trim().parse::<Uuid>().map_err(|_| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("'{}' is not a valid client id", text.trim()),
                    )
                })?;
                form.client_id = Some(id);
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn store_file(
    state: &AppState,
    file: Option<(String, Option<String>, Bytes)>,
) -> Result<StoredFileRef, ApiError> {
    let (file_name, content_type, data) = file.ok_or((
        StatusCode::BAD_REQUEST,
        "Missing 'file' part".to_string(),
    ))?;
    state
        .files
        .put(data, &file_name, content_type.as_deref())
        .await
        .map_err(storage_error)
}

async fn discard_file(state: &AppState, key: &str) {
    if let Err(e) = state.files.delete(key).await {
        tracing::warn!(key = %key, "Failed to remove stored file: {}", e);
    }
}

async fn load(state: &AppState, id: Uuid) -> Result<ResourceRecord, ApiError> {
    state
        .db
        .get_resource(id)
        .await
        .map_err(|e| db_error("Load resource", e))?
        .ok_or_else(|| not_found("Resource"))
}

async fn download(state: &AppState, resource: &ResourceRecord) -> Result<Response, ApiError> {
    let file = resource.file.as_ref().ok_or_else(|| not_found("File"))?;
    let data = state.files.get(&file.key).await.map_err(storage_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        data,
    )
        .into_response())
}

// --- Admin ---

pub async fn resources_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResourceListQuery>,
) -> Result<Json<Vec<ResourceRecord>>, ApiError> {
    let resources = state
        .db
        .list_resources(&ResourceListFilter {
            visible_to: query.client_id,
            category: validate::trim_optional(query.category),
        })
        .await
        .map_err(|e| db_error("List resources", e))?;
    Ok(Json(resources))
}

/// Create a link or text resource without a file.
pub async fn resources_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ResourceCreateRequest>,
) -> Result<(StatusCode, Json<ResourceRecord>), ApiError> {
    let params = CreateResourceParams {
        title: validate::require_text("title", &body.title, validate::MAX_TITLE_CHARS)
            .map_err(invalid)?,
        description: validate::optional_text(
            "description",
            body.description,
            validate::MAX_TEXT_CHARS,
        )
        .map_err(invalid)?,
        category: validate::optional_text("category", body.category, MAX_CATEGORY_CHARS)
            .map_err(invalid)?,
        url: validate::optional_url("url", body.url).map_err(invalid)?,
        file: None,
        client_id: body.client_id,
    };
    let resource = state
        .db
        .create_resource(&params)
        .await
        .map_err(|e| db_error("Create resource", e))?;
    publish(
        &state,
        ChangeTable::Resources,
        ChangeAction::Insert,
        resource.id,
        resource.client_id,
    );
    audit_admin(
        &principal,
        "resource.created",
        serde_json::json!({ "resource_id": resource.id }),
    );
    Ok((StatusCode::CREATED, Json(resource)))
}

/// Create a resource from a multipart form with a `file` part.
pub async fn resources_upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ResourceRecord>), ApiError> {
    let form = read_upload(multipart).await?;
    let title = match form.title.as_deref() {
        Some(title) => title.to_string(),
        None => form
            .file
            .as_ref()
            .map(|(name, _, _)| name.clone())
            .unwrap_or_default(),
    };
    let title = validate::require_text("title", &title, validate::MAX_TITLE_CHARS)
        .map_err(invalid)?;
    let description =
        validate::optional_text("description", form.description, validate::MAX_TEXT_CHARS)
            .map_err(invalid)?;
    let category = validate::optional_text("category", form.category, MAX_CATEGORY_CHARS)
        .map_err(invalid)?;

    let stored = store_file(&state, form.file).await?;
    let key = stored.key.clone();
    let created = state
        .db
        .create_resource(&CreateResourceParams {
            title,
            description,
            category,
            url: None,
            file: Some(stored),
            client_id: form.client_id,
        })
        .await;
    let resource = match created {
        Ok(resource) => resource,
        Err(e) => {
            discard_file(&state, &key).await;
            return Err(db_error("Create resource", e));
        }
    };

    publish(
        &state,
        ChangeTable::Resources,
        ChangeAction::Insert,
        resource.id,
        resource.client_id,
    );
    audit_admin(
        &principal,
        "resource.uploaded",
        serde_json::json!({ "resource_id": resource.id, "key": key }),
    );
    Ok((StatusCode::CREATED, Json(resource)))
}

/// Replace the file attached to an existing resource.
pub async fn resources_replace_file_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<ResourceRecord>, ApiError> {
    let existing = load(&state, id).await?;
    let form = read_upload(multipart).await?;
    let stored = store_file(&state, form.file).await?;
    let key = stored.key.clone();

    let updated = state
        .db
        .update_resource(
            id,
            &UpdateResourceParams {
                file: Some(Some(stored)),
                ..Default::default()
            },
        )
        .await;
    let resource = match updated {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            discard_file(&state, &key).await;
            return Err(not_found("Resource"));
        }
        Err(e) => {
            discard_file(&state, &key).await;
            return Err(db_error("Replace resource file", e));
        }
    };
    if let Some(old) = existing.file {
        discard_file(&state, &old.key).await;
    }

    publish(
        &state,
        ChangeTable::Resources,
        ChangeAction::Update,
        id,
        resource.client_id,
    );
    audit_admin(
        &principal,
        "resource.file_replaced",
        serde_json::json!({ "resource_id": id, "key": key }),
    );
    Ok(Json(resource))
}

pub async fn resources_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResourceRecord>, ApiError> {
    Ok(Json(load(&state, id).await?))
}

pub async fn resources_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResourcePatchRequest>,
) -> Result<Json<ResourceRecord>, ApiError> {
    let existing = load(&state, id).await?;
    let params = UpdateResourceParams {
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
        category: body
            .category
            .map(|c| validate::optional_text("category", c, MAX_CATEGORY_CHARS))
            .transpose()
            .map_err(invalid)?,
        url: body
            .url
            .map(|u| validate::optional_url("url", u))
            .transpose()
            .map_err(invalid)?,
        file: if body.remove_file { Some(None) } else { None },
        client_id: body.client_id,
    };
    let resource = state
        .db
        .update_resource(id, &params)
        .await
        .map_err(|e| db_error("Update resource", e))?
        .ok_or_else(|| not_found("Resource"))?;

    if body.remove_file
        && let Some(old) = existing.file
    {
        discard_file(&state, &old.key).await;
    }
    // A resource moving between clients must disappear from the old owner's view.
    if existing.client_id != resource.client_id {
        publish(
            &state,
            ChangeTable::Resources,
            ChangeAction::Delete,
            id,
            existing.client_id,
        );
    }
    publish(
        &state,
        ChangeTable::Resources,
        ChangeAction::Update,
        id,
        resource.client_id,
    );
    audit_admin(
        &principal,
        "resource.updated",
        serde_json::json!({ "resource_id": id }),
    );
    Ok(Json(resource))
}

pub async fn resources_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let existing = load(&state, id).await?;
    state
        .db
        .delete_resource(id)
        .await
        .map_err(|e| db_error("Delete resource", e))?;
    if let Some(file) = &existing.file {
        discard_file(&state, &file.key).await;
    }
    publish(
        &state,
        ChangeTable::Resources,
        ChangeAction::Delete,
        id,
        existing.client_id,
    );
    audit_admin(
        &principal,
        "resource.deleted",
        serde_json::json!({ "resource_id": id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resources_download_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let resource = load(&state, id).await?;
    download(&state, &resource).await
}

// --- Client portal ---

/// Shared resources plus those owned by the caller's client.
pub async fn portal_resources_list_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ResourceListQuery>,
) -> Result<Json<Vec<ResourceRecord>>, ApiError> {
    let client_id = tenant_scope(&principal, query.client_id).ok_or((
        StatusCode::FORBIDDEN,
        "No client is linked to this account".to_string(),
    ))?;
    let resources = state
        .db
        .list_resources(&ResourceListFilter {
            visible_to: Some(client_id),
            category: validate::trim_optional(query.category),
        })
        .await
        .map_err(|e| db_error("List resources", e))?;
    Ok(Json(resources))
}

async fn load_visible(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
) -> Result<ResourceRecord, ApiError> {
    let client_id = own_client(principal)?;
    let resource = load(state, id).await?;
    if !resource.is_visible_to(client_id) {
        return Err(not_found("Resource"));
    }
    Ok(resource)
}

pub async fn portal_resources_get_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResourceRecord>, ApiError> {
    Ok(Json(load_visible(&state, &principal, id).await?))
}

pub async fn portal_resources_download_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let resource = load_visible(&state, &principal, id).await?;
    download(&state, &resource).await
}
