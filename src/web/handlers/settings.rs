use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::auth::Principal;
use crate::db::SettingRow;
use crate::portal::audit;
use crate::web::handlers::{ApiError, audit_admin, db_error, not_found, publish};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

const MAX_KEY_LEN: usize = 128;
const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

/// Dotted lowercase keys such as `agency.name`.
fn check_key(key: &str) -> Result<(), ApiError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            format!("Invalid setting key '{key}'"),
        ))
    }
}

/// Settings rows have no id; change events carry a stable id derived from the key.
fn setting_event_id(key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

pub async fn settings_list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SettingRow>>, ApiError> {
    let rows = state
        .db
        .list_settings()
        .await
        .map_err(|e| db_error("List settings", e))?;
    Ok(Json(rows))
}

pub async fn settings_get_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<SettingResponse>, ApiError> {
    check_key(&key)?;
    let value = state
        .db
        .get_setting(&key)
        .await
        .map_err(|e| db_error("Load setting", e))?
        .ok_or_else(|| not_found("Setting"))?;
    Ok(Json(SettingResponse { key, value }))
}

pub async fn settings_set_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(key): Path<String>,
    Json(body): Json<SettingWriteRequest>,
) -> Result<StatusCode, ApiError> {
    check_key(&key)?;
    state
        .db
        .set_setting(&key, &body.value)
        .await
        .map_err(|e| db_error("Save setting", e))?;
    publish(
        &state,
        ChangeTable::Settings,
        ChangeAction::Update,
        setting_event_id(&key),
        None,
    );
    audit_admin(&principal, "settings.updated", serde_json::json!({ "key": key }));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn settings_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_key(&key)?;
    if !state
        .db
        .delete_setting(&key)
        .await
        .map_err(|e| db_error("Delete setting", e))?
    {
        return Err(not_found("Setting"));
    }
    publish(
        &state,
        ChangeTable::Settings,
        ChangeAction::Delete,
        setting_event_id(&key),
        None,
    );
    audit_admin(&principal, "settings.deleted", serde_json::json!({ "key": key }));
    Ok(StatusCode::NO_CONTENT)
}

/// Newest audit events first.
pub async fn audit_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditListResponse>, ApiError> {
    let Some(path) = state.audit_path.clone() else {
        return Ok(Json(AuditListResponse {
            enabled: false,
            events: Vec::new(),
        }));
    };
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    if limit == 0 || limit > MAX_AUDIT_LIMIT {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("'limit' must be between 1 and {MAX_AUDIT_LIMIT}"),
        ));
    }
    let event_type = query
        .event_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let events = tokio::task::spawn_blocking(move || {
        audit::read_recent(&path, event_type.as_deref(), limit)
    })
    .await
    .map_err(|e| {
        tracing::error!("Audit read task failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Read audit log failed".to_string(),
        )
    })?
    .map_err(|e| {
        tracing::error!("Failed to read audit log: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Read audit log failed".to_string(),
        )
    })?;

    Ok(Json(AuditListResponse {
        enabled: true,
        events,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_keys() {
        assert!(check_key("agency.name").is_ok());
        assert!(check_key("portal.welcome_text-v2").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("Agency.Name").is_err());
        assert!(check_key("../etc").is_err());
        assert!(check_key(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn setting_event_ids_are_stable() {
        assert_eq!(setting_event_id("agency.name"), setting_event_id("agency.name"));
        assert_ne!(setting_event_id("agency.name"), setting_event_id("agency.logo"));
    }
}
