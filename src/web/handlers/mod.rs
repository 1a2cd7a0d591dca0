//! Route handlers, grouped by entity.
//!
//! Handlers under `/api/admin` trust the area middleware to have admitted an
//! admin. Handlers under `/api/portal` derive the tenant from the principal
//! and never from the request.

pub mod accounts;
pub mod auth;
pub mod chat;
pub mod clients;
pub mod content;
pub mod dashboard;
pub mod pages;
pub mod requests;
pub mod resources;
pub mod settings;
pub mod tasks;

use axum::http::StatusCode;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{DatabaseError, StorageError, ValidationError};
use crate::portal::audit;
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeEvent, ChangeTable};

pub(crate) type ApiError = (StatusCode, String);

/// Map a store error to a response, logging anything unexpected.
pub(crate) fn db_error(context: &str, err: DatabaseError) -> ApiError {
    match err {
        DatabaseError::NotFound { entity, id } => {
            (StatusCode::NOT_FOUND, format!("{entity} {id} not found"))
        }
        DatabaseError::Constraint(message) => (StatusCode::CONFLICT, message),
        other => {
            tracing::error!("{}: {}", context, other);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{context} failed"))
        }
    }
}

pub(crate) fn invalid(err: ValidationError) -> ApiError {
    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
}

pub(crate) fn not_found(entity: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{entity} not found"))
}

pub(crate) fn storage_error(err: StorageError) -> ApiError {
    match err {
        StorageError::NotFound(_) => not_found("File"),
        StorageError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()),
        StorageError::InvalidKey(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        StorageError::Io(e) => {
            tracing::error!("File storage I/O error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "File storage failed".to_string(),
            )
        }
    }
}

/// Tenant of a client principal.
///
/// The area middleware already refuses client principals without a client,
/// so `None` here means the route was mounted outside the client area.
pub(crate) fn own_client(principal: &Principal) -> Result<Uuid, ApiError> {
    principal.client_id.ok_or((
        StatusCode::FORBIDDEN,
        "No client is linked to this account".to_string(),
    ))
}

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub(crate) fn publish(
    state: &AppState,
    table: ChangeTable,
    action: ChangeAction,
    id: Uuid,
    client_id: Option<Uuid>,
) {
    state
        .feed
        .publish(ChangeEvent::new(table, action, id, client_id));
}

/// Audit an admin mutation, tagged with the acting account.
pub(crate) fn audit_admin(principal: &Principal, event_type: &str, mut details: serde_json::Value) {
    if let Some(map) = details.as_object_mut() {
        map.insert(
            "actor".to_string(),
            serde_json::Value::String(principal.email.clone()),
        );
    }
    audit::record(event_type, details);
}
